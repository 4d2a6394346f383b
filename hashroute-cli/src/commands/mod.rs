mod owner;
mod route;
mod serve;

pub use owner::run_owner;
pub use route::run_route;
pub use serve::run_serve;
