//! Bridge assembly
//!
//! A [`Bridge`] owns one register map, the Ferroamp field binder writing to
//! it and the server reading from it. Several bridges can live in one
//! process; nothing here is global.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::binder::{run_ingest, FieldBinder};
use crate::catalog::sunspec_registry;
use crate::config::BridgeConfig;
use crate::error::{SunspecError, SunspecResult};
use crate::ferroamp::apply_profile;
use crate::register_map::RegisterMap;
use crate::server::SunspecServer;
use crate::telemetry::Sample;

/// One served Ferroamp device.
#[derive(Debug)]
pub struct Bridge {
    config: BridgeConfig,
    map: Arc<RegisterMap>,
    binder: Arc<FieldBinder>,
    server: SunspecServer,
}

impl Bridge {
    /// Validate the configuration and build the map, binder and server.
    ///
    /// Every error returned here is a configuration error.
    pub fn new(config: BridgeConfig) -> SunspecResult<Self> {
        config.validate()?;

        let registry = sunspec_registry()?;
        let map = Arc::new(RegisterMap::new(&registry, config.base_address)?);
        let binder = apply_profile(FieldBinder::builder(Arc::clone(&map)), &config.identity)?.build()?;
        let server = SunspecServer::new(Arc::clone(&map), config.frame_timeout);

        info!(
            "Bridge ready: {} registers at {}, identity {} {}",
            map.size(),
            map.base_address(),
            config.identity.manufacturer,
            config.identity.model
        );

        Ok(Self {
            config,
            map,
            binder: Arc::new(binder),
            server,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn register_map(&self) -> &Arc<RegisterMap> {
        &self.map
    }

    pub fn binder(&self) -> &Arc<FieldBinder> {
        &self.binder
    }

    pub fn server(&self) -> &SunspecServer {
        &self.server
    }

    /// Bounded sample queue sized from the configuration.
    pub fn channel(&self) -> (mpsc::Sender<Sample>, mpsc::Receiver<Sample>) {
        mpsc::channel(self.config.ingest_capacity)
    }

    /// Bind the configured Modbus listen address.
    pub async fn listen(&self) -> SunspecResult<TcpListener> {
        let addr = self.config.socket_addr()?;
        TcpListener::bind(addr).await.map_err(|e| {
            SunspecError::configuration(format!("cannot listen on {}: {}", addr, e))
        })
    }

    /// Run the ingest loop and the server until `shutdown`.
    ///
    /// Returns once every connection has closed and every queued sample has
    /// been applied.
    pub async fn run(
        &self,
        listener: TcpListener,
        samples: mpsc::Receiver<Sample>,
        shutdown: CancellationToken,
    ) -> SunspecResult<()> {
        let ingest = tokio::spawn(run_ingest(
            Arc::clone(&self.binder),
            samples,
            shutdown.clone(),
        ));

        let served = self.server.serve(listener, shutdown.clone()).await;
        if let Err(e) = &served {
            error!("Server failed: {}", e);
            shutdown.cancel();
        }

        if let Err(e) = ingest.await {
            error!("Ingest task failed: {}", e);
        }

        let binder = self.binder.stats();
        let server = self.server.stats();
        info!(
            "Bridge stopped: {} samples, {} fields written, {} discarded, {} requests, {} exceptions",
            binder.samples_received,
            binder.fields_written,
            binder.updates_discarded,
            server.requests_served,
            server.exceptions_sent
        );
        served
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::INVERTER_MODEL_ID;
    use crate::config::DeviceIdentity;
    use crate::value::FieldValue;

    #[test]
    fn test_new_applies_identity() {
        let config = BridgeConfig::new()
            .with_identity(DeviceIdentity::default().with_serial_number("FA-0042"));
        let bridge = Bridge::new(config).unwrap();

        let map = bridge.register_map();
        let sn = map.locate(crate::catalog::COMMON_MODEL_ID, "SN").unwrap();
        assert_eq!(map.field_value(&sn).unwrap(), FieldValue::Str("FA-0042".into()));

        let st = map.locate(INVERTER_MODEL_ID, "St").unwrap();
        assert_eq!(map.field_value(&st).unwrap(), FieldValue::Enum16(4));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Bridge::new(BridgeConfig::new().with_ingest_capacity(0)).unwrap_err();
        assert!(!err.is_recoverable());

        assert!(Bridge::new(BridgeConfig::new().with_base_address(65500)).is_err());
    }

    #[test]
    fn test_independent_bridges() {
        let a = Bridge::new(BridgeConfig::new()).unwrap();
        let b = Bridge::new(BridgeConfig::new()).unwrap();
        assert!(!Arc::ptr_eq(a.register_map(), b.register_map()));
    }
}
