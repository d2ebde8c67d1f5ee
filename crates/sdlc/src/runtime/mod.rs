//! The runtime library generated parsers link against.
//!
//! Value types (`Bytes`, streams, checked integers, regular expressions,
//! network values), the cooperative fiber layer, the global parser
//! registry, and the stream-reassembly sink. The compiler's constant
//! folder uses the same value operations, so compile-time folding and
//! runtime evaluation cannot drift apart.

pub mod bytes;
pub mod error;
pub mod fiber;
pub mod integer;
pub mod net;
pub mod regexp;
pub mod registry;
pub mod sink;
pub mod stream;
pub mod time;

pub use bytes::{Bytes, Charset, DecodeErrors, Side};
pub use error::{ErrorKind, RtResult, RuntimeError};
pub use fiber::{stats::memory_statistics, stats::MemoryStatistics, Fiber, FiberStatus, Parse, Wait};
pub use integer::{BitOrder, ByteOrder, SInt, UInt, Width};
pub use net::{Address, Direction, Network, Port, Protocol};
pub use regexp::{MatchState, RegExp, RegExpFlags};
pub use registry::{ConnectedUnit, MimeType, ParserMetadata, ParserRegistry, PortSpec};
pub use sink::{Filter, ReassemblerPolicy, Sink, SinkHooks};
pub use stream::{SearchDirection, Stream, StreamIter, View};
pub use time::{Interval, Time};
