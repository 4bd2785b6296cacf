use log::trace;

/// Defer continuation to the next executor turn.
/// The first poll of the returned future is always pending
pub(crate) async fn next_tick() {
    trace!("Next tick");
    tokio::task::yield_now().await
}
