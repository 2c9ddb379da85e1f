mod export;
mod index;
mod search;
mod stat;

pub use export::*;
pub use index::*;
pub use search::*;
pub use stat::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}
