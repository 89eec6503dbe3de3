//! Snapshot of a connect indication that outlives the stack's callback.

use std::sync::Arc;

use shared::IndicationParameters;

use crate::device::ServerContext;

/// Owned copy of an indication's parameters plus the server it belongs to.
///
/// Built once, when deferral is decided, and consumed by value by the
/// deferred callback. Not `Clone`: one context serves one dispatch cycle.
#[derive(Debug)]
pub struct ConnectionContext {
    server: Arc<ServerContext>,
    params: IndicationParameters,
}

impl ConnectionContext {
    /// Copy `params` and take a reference on `server`.
    pub fn capture(server: &Arc<ServerContext>, params: &IndicationParameters) -> Self {
        Self { server: Arc::clone(server), params: *params }
    }

    pub fn server(&self) -> &Arc<ServerContext> {
        &self.server
    }

    pub fn params(&self) -> &IndicationParameters {
        &self.params
    }

    pub fn into_parts(self) -> (Arc<ServerContext>, IndicationParameters) {
        (self.server, self.params)
    }
}
