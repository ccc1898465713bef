use std::{ops::Deref, sync::Arc};

use crate::bridge::PunishmentBridge;
use crate::config::LinkConfig;
use crate::links::AccountLinkDirectory;

/// Shared state handed to commands and event handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

pub struct DataInner {
    pub bridge: PunishmentBridge,
    pub links: AccountLinkDirectory,
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guild_id", &self.config().guild_id)
            .field("muted_role", &self.config().muted_role())
            .field("linked_accounts", &self.links.len())
            .finish_non_exhaustive()
    }
}

impl Data {
    #[must_use]
    pub fn new(bridge: PunishmentBridge, links: AccountLinkDirectory) -> Self {
        Self(Arc::new(DataInner { bridge, links }))
    }

    #[must_use]
    pub fn config(&self) -> &LinkConfig {
        self.bridge.enforcer().config()
    }
}
