mod forwarded_request_extractor;

pub use forwarded_request_extractor::*;
