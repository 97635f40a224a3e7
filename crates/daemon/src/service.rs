//! Repeater service: binds both ports and owns every background task

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vncrepeater_core::{IdPolicy, Side};
use vncrepeater_crypto::ChallengeKey;
use vncrepeater_relay::{Shutdown, SlotTable, DEFAULT_MAX_SLOTS};
use vncrepeater_settings::Settings;

use crate::connection::ConnectionContext;
use crate::listener::{accept_loop, bind};
use crate::reaper::run_reaper;
use crate::{DaemonError, Result};

/// Everything the repeater needs to start
#[derive(Debug, Clone)]
pub struct RepeaterConfig {
    pub server_addr: SocketAddr,
    pub viewer_addr: SocketAddr,
    pub max_slots: usize,
    pub reaper_interval: Duration,
    pub shutdown_grace: Duration,
    pub id_policy: IdPolicy,
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 5500)),
            viewer_addr: SocketAddr::from(([0, 0, 0, 0], 5900)),
            max_slots: DEFAULT_MAX_SLOTS,
            reaper_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
            id_policy: IdPolicy::default(),
        }
    }
}

impl RepeaterConfig {
    /// Build from validated settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        let ip: IpAddr = settings.listen.bind_address.trim().parse().map_err(|_| {
            DaemonError::Config(format!(
                "bind_address {:?} is not an IP address",
                settings.listen.bind_address
            ))
        })?;

        Ok(Self {
            server_addr: SocketAddr::new(ip, settings.listen.server_port),
            viewer_addr: SocketAddr::new(ip, settings.listen.viewer_port),
            max_slots: settings.slots.max_slots,
            reaper_interval: settings.slots.reaper_interval(),
            shutdown_grace: settings.shutdown_grace(),
            id_policy: settings.slots.id_policy,
        })
    }

    /// Both listeners on ephemeral loopback ports
    pub fn loopback() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            viewer_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Self::default()
        }
    }
}

/// A running repeater
pub struct Repeater {
    server_addr: SocketAddr,
    viewer_addr: SocketAddr,
    registry: Arc<SlotTable<TcpStream>>,
    shutdown: Shutdown,
    shutdown_grace: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Repeater {
    /// Bind both ports and start accepting. Generates a fresh challenge
    /// key, so tokens never survive a restart.
    pub async fn start(config: RepeaterConfig) -> Result<Self> {
        if config.max_slots == 0 {
            return Err(DaemonError::Config("max_slots must be at least 1".to_string()));
        }

        let server_listener = bind(Side::Server, config.server_addr).await?;
        let viewer_listener = bind(Side::Viewer, config.viewer_addr).await?;
        let server_addr = server_listener.local_addr()?;
        let viewer_addr = viewer_listener.local_addr()?;

        let registry = Arc::new(SlotTable::new(config.max_slots));
        let shutdown = Shutdown::new();
        let ctx = Arc::new(ConnectionContext {
            registry: registry.clone(),
            key: Arc::new(ChallengeKey::generate()),
            shutdown: shutdown.clone(),
            id_policy: config.id_policy,
        });

        let tasks = vec![
            tokio::spawn(accept_loop(
                server_listener,
                Side::Server,
                ctx.clone(),
                config.shutdown_grace,
            )),
            tokio::spawn(accept_loop(
                viewer_listener,
                Side::Viewer,
                ctx,
                config.shutdown_grace,
            )),
            tokio::spawn(run_reaper(
                registry.clone(),
                config.reaper_interval,
                shutdown.clone(),
            )),
        ];

        info!(
            "Repeater started: servers on {}, viewers on {}, {} slots",
            server_addr, viewer_addr, config.max_slots
        );

        Ok(Self {
            server_addr,
            viewer_addr,
            registry,
            shutdown,
            shutdown_grace: config.shutdown_grace,
            tasks,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn viewer_addr(&self) -> SocketAddr {
        self.viewer_addr
    }

    pub fn registry(&self) -> &Arc<SlotTable<TcpStream>> {
        &self.registry
    }

    /// Handle that stops the repeater when triggered
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Resolve once shutdown has been requested, including by a fatal error
    pub async fn stopped(&self) {
        self.shutdown.wait().await
    }

    /// Stop accepting, wind down every connection, and close whatever is
    /// still waiting in the slot table. Returns how many slots were dropped.
    pub async fn stop(self) -> Result<usize> {
        info!("Stopping repeater (grace {:?})", self.shutdown_grace);
        self.shutdown.trigger();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Repeater task ended abnormally: {}", e);
            }
        }

        let dropped = self.registry.drain()?;
        info!("Repeater stopped, closed {} waiting slot(s)", dropped);
        Ok(dropped)
    }
}
