pub mod bus;
pub mod pubsub_reconnect;
pub mod stream;

pub use bus::RedisBus;
pub use pubsub_reconnect::ReconnectingPubSub;
pub use stream::{OrderStream, OrderStreamConsumer, RetentionPolicy, StreamedOrder};
