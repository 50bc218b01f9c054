pub mod framer;
pub mod reader;

pub use framer::{frame_json, MultipartForm, BOUNDARY};
pub use reader::{HttpResponse, ResponseReader};
