use std::env;
use std::sync::Arc;

use frisquet_connect::{Config, Controller, DeviceCategory, FrisquetClient, Temperature};

#[tokio::main]
async fn main() -> frisquet_connect::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let path = args.get(1).expect("usage: monitor <config.json>");

    let config = Config::from_file(path)?;
    let client = Arc::new(FrisquetClient::from_config(&config)?);
    let controller = Controller::new(client);

    println!("Scanning {}...", config.hostname);
    let devices = controller.scan().await?;
    for device in &devices {
        println!("{:?} {} ({})", device.category, device.name, device.accessory_id);
    }

    loop {
        for device in &devices {
            match device.category {
                DeviceCategory::Sensor => match controller.environment(&device.device_id).await {
                    Ok(tenths) => {
                        println!("[{}] {}", device.name, Temperature::from_tenths(tenths))
                    }
                    Err(e) => eprintln!("Read error: {e}"),
                },
                DeviceCategory::Thermostat => match controller.zone(&device.device_id).await {
                    Ok(Some(zone)) => {
                        let settings = &zone.carac_zone;
                        println!(
                            "[{}] ambient: {} | target: {} | mode: {:?}{}",
                            zone.nom,
                            settings
                                .ambient_temperature()
                                .map(|t| t.to_string())
                                .unwrap_or_else(|| "-".into()),
                            settings
                                .target_temperature()
                                .map(|t| t.to_string())
                                .unwrap_or_else(|| "-".into()),
                            settings.zone_mode(),
                            if settings.is_heating() == Some(true) { " | HEAT" } else { "" },
                        );
                    }
                    Ok(None) => eprintln!("Zone {} disappeared", device.device_id),
                    Err(e) => eprintln!("Read error: {e}"),
                },
            }
        }
        tokio::time::sleep(config.history_interval()).await;
    }
}
