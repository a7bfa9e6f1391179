//! Operation adapters: the concrete things the runner times.

pub mod decode;
pub mod http;

pub use decode::{DecodeOperation, DecoderKind, Schema};
pub use http::{
    ClientSettings, FastClient, HttpClient, HttpClientKind, HttpOperation, HttpRequest,
    HttpResponse, Method, StandardClient, WireAccounting,
};
