//! Controller assembly from the application configuration

use btserver_core::{CapabilityProbe, ServerController, StaticProbe, TcpTransport};
use tracing::info;

use crate::config::{AppConfig, TransportKind};
use crate::error::Result;

/// Build a controller for the configured transport
pub fn build_controller(config: &AppConfig) -> Result<ServerController> {
    let engine = config.engine_config();
    match config.transport.kind {
        TransportKind::Tcp => {
            info!("Using tcp transport on {}", config.transport.tcp_bind);
            let controller =
                ServerController::builder(TcpTransport::with_bind_addr(config.transport.tcp_bind))
                    .with_engine_config(engine)
                    .with_probe(StaticProbe::present())
                    .build()?;
            Ok(controller)
        }
        TransportKind::Bluez => build_bluez_controller(config, engine),
    }
}

#[cfg(feature = "bluez")]
fn build_bluez_controller(
    config: &AppConfig,
    engine: btserver_core::EngineConfig,
) -> Result<ServerController> {
    use btserver_bluez::{AdapterProbe, RfcommTransport, SdpAdvertiser};

    info!(
        "Using RFCOMM transport (channel {})",
        match config.transport.rfcomm_channel {
            0 => "auto".to_string(),
            channel => channel.to_string(),
        }
    );
    let transport = RfcommTransport::new().with_channel(config.transport.rfcomm_channel);
    let advertiser = SdpAdvertiser::for_transport(&transport);
    let controller = ServerController::builder(transport)
        .with_engine_config(engine)
        .with_advertiser(advertiser)
        .with_probe(AdapterProbe::new())
        .build()?;
    Ok(controller)
}

#[cfg(not(feature = "bluez"))]
fn build_bluez_controller(
    _config: &AppConfig,
    _engine: btserver_core::EngineConfig,
) -> Result<ServerController> {
    Err(crate::error::CliError::FeatureNotAvailable(
        "bluez transport (rebuild with --features bluez)".into(),
    ))
}

/// Capability probe matching the configured transport
pub fn build_probe(config: &AppConfig) -> Result<Box<dyn CapabilityProbe>> {
    match config.transport.kind {
        TransportKind::Tcp => Ok(Box::new(StaticProbe::present())),
        #[cfg(feature = "bluez")]
        TransportKind::Bluez => Ok(Box::new(btserver_bluez::AdapterProbe::new())),
        #[cfg(not(feature = "bluez"))]
        TransportKind::Bluez => Err(crate::error::CliError::FeatureNotAvailable(
            "bluez adapter probing (rebuild with --features bluez)".into(),
        )),
    }
}
