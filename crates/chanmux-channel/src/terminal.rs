use crate::channel::ChannelId;

/// A terminal view attached to a channel.
///
/// The channel holds only a weak reference. Destroying the channel detaches
/// the terminal and never destroys it.
pub trait Terminal {
    /// Output produced by the peer.
    fn receive(&mut self, data: &[u8]);

    /// The peer terminated.
    fn channel_exited(&mut self, id: ChannelId, status: i32);
}
