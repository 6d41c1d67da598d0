use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::client::FrisquetClient;
use crate::protocol::site_path;
use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(10);

pub const OUTDOOR_SENSOR_ID: &str = "T_EXT";
const OUTDOOR_SENSOR_NAME: &str = "Sonde ext\u{e9}rieure";
const MANUFACTURER: &str = "Frisquet";
const ACCESSORY_PREFIX: &str = "FrisquetConnect";

struct CachedSite {
    started: Instant,
    site: Arc<Site>,
}

/// Site reader over a [`FrisquetClient`], with a single-slot cache that
/// reuses the last fetch for reads inside the debounce window.
pub struct Controller {
    client: Arc<FrisquetClient>,
    site_id: RwLock<Option<String>>,
    debounce: Duration,
    cache: Mutex<Option<CachedSite>>,
}

impl Controller {
    pub fn new(client: Arc<FrisquetClient>) -> Self {
        Self {
            client,
            site_id: RwLock::new(None),
            debounce: DEFAULT_DEBOUNCE,
            cache: Mutex::new(None),
        }
    }

    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = RwLock::new(Some(site_id.into()));
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    pub fn client(&self) -> &Arc<FrisquetClient> {
        &self.client
    }

    pub async fn site_id(&self) -> Option<String> {
        self.site_id.read().await.clone()
    }

    /// Log in, pick the account's first site and list its devices.
    pub async fn scan(&self) -> Result<Vec<DeviceDescriptor>> {
        let login = self.client.login().await?;
        let site_id = login
            .user
            .primary_site_id()
            .ok_or(Error::NoSite)?
            .to_string();
        debug!(site_id = %site_id, "scanning site");
        *self.site_id.write().await = Some(site_id.clone());

        let site = self.refresh_site().await?;
        let mut devices = Vec::new();

        if site.environment(OUTDOOR_SENSOR_ID) != 0.0 {
            devices.push(descriptor(
                &site_id,
                OUTDOOR_SENSOR_ID,
                OUTDOOR_SENSOR_NAME,
                DeviceCategory::Sensor,
                OUTDOOR_SENSOR_ID.to_string(),
            ));
        }

        for zone in &site.zones {
            devices.push(descriptor(
                &site_id,
                &zone.identifiant,
                &zone.nom,
                DeviceCategory::Thermostat,
                zone.id.to_string(),
            ));
        }

        debug!(count = devices.len(), "scan found devices");
        Ok(devices)
    }

    /// Debounced read of the site payload.
    pub async fn site(&self) -> Result<Arc<Site>> {
        let mut slot = self.cache.lock().await;
        if let Some(cached) = slot.as_ref()
            && cached.started.elapsed() < self.debounce
        {
            trace!("reusing debounced site");
            return Ok(cached.site.clone());
        }
        self.fetch_into(&mut slot).await
    }

    /// Fetch the site now, restarting the debounce window.
    pub async fn refresh_site(&self) -> Result<Arc<Site>> {
        let mut slot = self.cache.lock().await;
        self.fetch_into(&mut slot).await
    }

    /// Environment reading by device id, 0 when absent.
    pub async fn environment(&self, device_id: &str) -> Result<f64> {
        Ok(self.site().await?.environment(device_id))
    }

    pub async fn zone(&self, device_id: &str) -> Result<Option<Zone>> {
        Ok(self.site().await?.zone(device_id).cloned())
    }

    async fn fetch_into(&self, slot: &mut Option<CachedSite>) -> Result<Arc<Site>> {
        let site_id = self.site_id().await.ok_or(Error::NoSite)?;
        let started = Instant::now();
        debug!(site_id = %site_id, "fetching site");
        let site = Arc::new(self.client.get_json::<Site>(&site_path(&site_id)).await?);
        *slot = Some(CachedSite {
            started,
            site: site.clone(),
        });
        Ok(site)
    }
}

pub fn accessory_id(site_id: &str, device_id: &str) -> String {
    let short = site_id.get(6..).unwrap_or("");
    format!("{ACCESSORY_PREFIX}:{short}:accessories:{device_id}")
}

fn descriptor(
    site_id: &str,
    device_id: &str,
    name: &str,
    category: DeviceCategory,
    model: String,
) -> DeviceDescriptor {
    DeviceDescriptor {
        name: name.to_string(),
        category,
        device_id: device_id.to_string(),
        accessory_id: accessory_id(site_id, device_id),
        manufacturer: MANUFACTURER.to_string(),
        serial_number: format!("{site_id}.{device_id}"),
        model,
    }
}
