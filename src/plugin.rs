use std::sync::Arc;

use async_trait::async_trait;

use crate::{common::errors::Result, riffy::Riffy};

/// Extension hook run once on `Riffy::init` and again on shutdown.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self, riffy: &Arc<Riffy>) -> Result<()>;

    async fn unload(&self, _riffy: &Arc<Riffy>) -> Result<()> {
        Ok(())
    }
}
