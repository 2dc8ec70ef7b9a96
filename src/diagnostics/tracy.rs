//! Tracy profiler hooks.
//!
//! Without the `tracy` feature these compile to nothing.

/// Mark a presented frame.
#[inline]
pub fn frame_mark() {
    #[cfg(feature = "tracy")]
    if let Some(client) = tracy_client::Client::running() {
        client.frame_mark();
    }
}

/// Plot the number of device bytes currently reserved by the allocator.
#[inline]
pub fn plot_reserved_bytes(bytes: u64) {
    #[cfg(feature = "tracy")]
    if let Some(client) = tracy_client::Client::running() {
        client.plot(tracy_client::plot_name!("framegfx reserved bytes"), bytes as f64);
    }
    #[cfg(not(feature = "tracy"))]
    let _ = bytes;
}
