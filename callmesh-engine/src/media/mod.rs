mod capture;
mod media_source;
mod track;

pub use capture::*;
pub use media_source::*;
pub use track::*;
