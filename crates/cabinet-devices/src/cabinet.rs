use std::sync::Arc;

use cabinet_async::{AsyncConfig, AsyncEngine};
use cabinet_iohook::IoChain;
use cabinet_jvs::{Io3, Io3Backend, JvsBus};

use crate::config::{CabinetConfig, ConfigError};
use crate::jvs_port::JvsPort;

/// Everything a cabinet exposes to the application, wired from a [`CabinetConfig`].
#[derive(Debug)]
pub struct Cabinet {
    chain: IoChain,
    jvs: Option<Arc<JvsPort>>,
}

impl Cabinet {
    /// Builds the operation chain and, when enabled, a JVS port whose bus has one IO3 node per
    /// entry of `backends`, head first.
    pub fn new<B>(config: &CabinetConfig, backends: Vec<B>) -> Result<Self, ConfigError>
    where
        B: Io3Backend + 'static,
    {
        config.validate()?;
        let chain = IoChain::new();

        if !config.jvs.enable {
            tracing::info!("JVS emulation disabled");
            return Ok(Self { chain, jvs: None });
        }

        let nodes = usize::from(config.jvs.nodes);
        if backends.len() != nodes {
            return Err(ConfigError::BackendCount {
                nodes,
                backends: backends.len(),
            });
        }

        let bus = JvsBus::build(backends, |backend, next| Box::new(Io3::new(backend, next)));
        let engine = config.jvs.async_reads.then(|| {
            AsyncEngine::new(AsyncConfig {
                name: Some(format!("jvs-{}", config.jvs.port_name())),
                poll_delay: config.jvs.poll_delay(),
            })
        });
        let port = Arc::new(JvsPort::new(config.jvs.port, bus, engine));
        chain.register(port.clone());
        tracing::info!(port = %config.jvs.port_name(), nodes, "JVS port attached");

        Ok(Self {
            chain,
            jvs: Some(port),
        })
    }

    pub fn chain(&self) -> &IoChain {
        &self.chain
    }

    pub fn jvs(&self) -> Option<&JvsPort> {
        self.jvs.as_deref()
    }

    /// Runs `f` against the JVS bus, if there is one.
    pub fn bus<R>(&self, f: impl FnOnce(&mut JvsBus) -> R) -> Option<R> {
        self.jvs.as_ref().map(|port| port.with_bus(f))
    }
}

impl Drop for Cabinet {
    fn drop(&mut self) {
        if let Some(port) = &self.jvs {
            port.shutdown();
        }
    }
}
