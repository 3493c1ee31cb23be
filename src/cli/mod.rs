mod build;
mod export;
mod search;
pub mod server;
mod shell;
mod status;

pub use build::*;
pub use export::*;
pub use search::*;
pub use server::*;
pub use shell::*;
pub use status::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
