mod url;
mod visit;

pub use url::{CreateUrlRequest, ShortLink};
pub use visit::{Device, VisitEvent, VisitRow, DIRECT, UNKNOWN};
