pub mod echo;
pub mod http;
pub mod registry;
pub mod schema;
pub mod validation;

pub use echo::EchoTool;
pub use http::HttpTool;
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use schema::args_schema;
pub use validation::validate_arguments;
