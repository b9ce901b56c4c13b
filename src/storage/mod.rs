/*! Byte buffers for packet assembly and consumption.

[Buffer] holds an outbound payload with reserved headroom so that lower-layer
headers can be prepended in place. [Reader] is a cursor over received bytes,
handed to the protocol state machine.
*/

mod buffer;

pub use self::buffer::{Buffer, Reader};
