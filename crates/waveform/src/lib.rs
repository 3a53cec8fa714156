//! Waveform primitives: traces, streams, rolling buffers, and the
//! pre-processing pipeline shared by templates and continuous data.

pub mod buffer;
pub mod process;
pub mod trace;

pub use buffer::{BufferError, SampleDeque, TraceBuffer, WaveBuffer};
pub use process::{ProcessError, bandpass, decimate, highpass, lowpass, process};
pub use trace::{Stream, Trace};
