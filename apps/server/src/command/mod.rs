pub mod client;
pub mod index;
pub mod serve;
pub mod stop;

use crate::error::Result;

pub use index::IndexCommand;
pub use serve::ServeCommand;
pub use stop::StopCommand;

#[async_trait::async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}
