//! Device Provisioner - Main Entry Point
//!
//! Runs one provisioning attempt against a simulated device with the operator's
//! answers taken from the command line.

use std::sync::Arc;

use clap::Parser;
use device_provisioner::{
    config::{CliArgs, JsonFilePreferences, Settings, SettingsOverrides},
    core::{
        delivery::{ProvisioningState, WorkflowStatus},
        discovery::DiscoveryRequest,
        operator::ScriptedOperator,
        scanner::{PasswordPrompt, password_prompt},
        service::Provisioner,
        types::{DeviceConfiguration, ProvisioningStep, ScanEntry},
    },
    protocol::config_payload::location_from_inputs,
    session::{Scenario, SimulatedDevice},
    transport::{HostRadio, RadioProbe, StaticRadio},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,device_provisioner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    info!(
        preferences = %args.preferences.display(),
        scenario = ?args.scenario,
        qr = args.qr.is_some(),
        ssid = %args.ssid,
        "Starting device provisioner"
    );

    let store = JsonFilePreferences::open(&args.preferences)?;
    debug!(path = %store.path().display(), "Preferences loaded");
    let settings = Settings::load(&store, &SettingsOverrides::from(&args))?;

    let scenario = match &args.scenario {
        Some(path) => Scenario::from_file(path)?,
        None => Scenario::default(),
    };
    let device = Arc::new(SimulatedDevice::with_scenario(scenario));
    let operator = Arc::new(
        ScriptedOperator::new(args.choose_transport)
            .accept_fallback(args.accept_fallback)
            .manual_reconnects(args.manual_reconnects),
    );

    if args.probe_host_radios {
        let radio = Arc::new(HostRadio::new(args.adapter.clone(), args.interface.clone()));
        run(Provisioner::new(device, radio, operator, settings), &args).await
    } else {
        let radio = Arc::new(StaticRadio::available());
        run(Provisioner::new(device, radio, operator, settings), &args).await
    }
}

async fn run<R: RadioProbe>(
    provisioner: Provisioner<SimulatedDevice, R, ScriptedOperator>,
    args: &CliArgs,
) -> Result<(), BoxError> {
    // Progress is rendered by this task only
    let mut progress = provisioner.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            let state = progress.borrow_and_update().clone();
            render(&state);
            if progress.changed().await.is_err() {
                break;
            }
        }
    });

    let attempt = attempt(&provisioner, args);
    tokio::pin!(attempt);

    let interrupted = tokio::select! {
        result = &mut attempt => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let result = match interrupted {
        Some(result) => result,
        None => {
            warn!("Received SIGINT (Ctrl+C), cancelling");
            // The attempt still owns its session; let it wind down
            let (_, result) = tokio::join!(provisioner.cancel(), &mut attempt);
            result
        }
    };

    match &result {
        Ok(()) => {
            provisioner.finish().await;
        }
        Err(e) => {
            error!("Provisioning failed: {}", e);
            provisioner.cancel().await;
        }
    }

    // Let the printer catch up with the final state
    tokio::task::yield_now().await;
    printer.abort();
    result
}

async fn attempt<R: RadioProbe>(
    provisioner: &Provisioner<SimulatedDevice, R, ScriptedOperator>,
    args: &CliArgs,
) -> Result<(), BoxError> {
    let request = DiscoveryRequest {
        qr: args.qr.clone(),
        device_name: args.device_name.clone(),
        proof_of_possession: args.pop.clone(),
        username: args.username.clone(),
    };
    let capabilities = provisioner.discover(&request).await?;
    info!(security = ?capabilities.security, "Device ready");

    let results = provisioner.scan().await?;
    for network in results.networks() {
        println!("  {:<32} {:>4} dBm  {:?}", network.ssid, network.rssi, network.auth_mode);
    }

    let entry = results
        .networks()
        .find(|network| network.ssid == args.ssid)
        .cloned()
        .map(ScanEntry::Network)
        .unwrap_or(ScanEntry::JoinOtherNetwork);
    if password_prompt(&entry) == PasswordPrompt::Required && args.password.is_none() {
        warn!(ssid = %args.ssid, "Network is protected but no password was given");
    }
    let credentials =
        provisioner.select(&entry, Some(args.ssid.as_str()), args.password.as_deref())?;

    let configuration = match &args.api_key {
        Some(api_key) => Some(
            DeviceConfiguration::new(
                api_key.clone(),
                location_from_inputs(&args.lat, &args.lon, &args.zipcode, &args.country)?,
            )
            .with_language(args.lang.clone())
            .with_units(args.units),
        ),
        None => None,
    };

    let state = provisioner
        .provision(configuration.as_ref(), &credentials)
        .await?;
    info!(steps = state.history.len(), "Provisioning complete");
    Ok(())
}

fn label(step: ProvisioningStep) -> &'static str {
    match step {
        ProvisioningStep::SendingConfiguration => "Sending device configuration",
        ProvisioningStep::SendingWifiCredentials => "Sending Wi-Fi credentials",
        ProvisioningStep::AttemptingConnection => "Device connecting to Wi-Fi",
        ProvisioningStep::VerifyingStatus => "Confirming connection",
        ProvisioningStep::Complete => "Provisioning complete",
    }
}

fn render(state: &ProvisioningState) {
    match &state.status {
        WorkflowStatus::Running => println!("[....] {}", label(state.step)),
        WorkflowStatus::Failed { cause } => println!("[fail] {}: {}", label(state.step), cause),
        WorkflowStatus::Complete => println!("[done] {}", label(state.step)),
    }
}
