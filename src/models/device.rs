use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MAX_DEVICES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: Option<String>,
    pub browser: Option<String>,
    pub user_agent: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    pub platform: String,
    pub browser: String,
    pub user_agent: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub active: bool,
}

impl Device {
    pub fn new(subscription: PushSubscription, info: DeviceInfo, now: DateTime<Utc>) -> Self {
        let platform = info.platform.unwrap_or_else(|| "unknown".to_string());
        let browser = info.browser.unwrap_or_else(|| "unknown".to_string());
        let name = info
            .name
            .unwrap_or_else(|| format!("{} on {}", browser, platform));

        Self {
            device_id: Uuid::new_v4().to_string(),
            endpoint: subscription.endpoint,
            keys: subscription.keys,
            platform,
            browser,
            user_agent: info.user_agent.unwrap_or_default(),
            name,
            created_at: now,
            last_active: now,
            active: true,
        }
    }

    pub fn public_view(&self) -> PublicDevice {
        PublicDevice {
            device_id: self.device_id.clone(),
            platform: self.platform.clone(),
            browser: self.browser.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            last_active: self.last_active,
            active: self.active,
        }
    }
}

/// Device fields that are safe to hand back to a client. No keys, no endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicDevice {
    pub device_id: String,
    pub platform: String,
    pub browser: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub device_id: String,
    pub refreshed: bool,
    pub evicted: Option<Device>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceList {
    devices: Vec<Device>,
}

impl DeviceList {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<Device> {
        self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn active(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| d.active)
    }

    /// Upserts by endpoint. A known endpoint is refreshed in place; a new one
    /// evicts the least recently active device once `max_devices` is reached.
    pub fn register(
        &mut self,
        subscription: PushSubscription,
        info: DeviceInfo,
        max_devices: usize,
        now: DateTime<Utc>,
    ) -> Registration {
        if let Some(existing) = self
            .devices
            .iter_mut()
            .find(|d| d.endpoint == subscription.endpoint)
        {
            existing.keys = subscription.keys;
            existing.last_active = now;
            existing.active = true;
            if let Some(user_agent) = info.user_agent {
                existing.user_agent = user_agent;
            }
            if let Some(name) = info.name {
                existing.name = name;
            }
            return Registration {
                device_id: existing.device_id.clone(),
                refreshed: true,
                evicted: None,
            };
        }

        let mut evicted = None;
        while self.devices.len() >= max_devices.max(1) {
            let Some(lru) = self
                .devices
                .iter()
                .enumerate()
                .min_by_key(|(_, d)| d.last_active)
                .map(|(idx, _)| idx)
            else {
                break;
            };
            evicted = Some(self.devices.remove(lru));
        }

        let device = Device::new(subscription, info, now);
        let device_id = device.device_id.clone();
        self.devices.push(device);

        Registration {
            device_id,
            refreshed: false,
            evicted,
        }
    }

    pub fn remove(&mut self, device_id: &str) -> Option<Device> {
        let idx = self.devices.iter().position(|d| d.device_id == device_id)?;
        Some(self.devices.remove(idx))
    }

    pub fn remove_endpoint(&mut self, endpoint: &str) -> Option<Device> {
        let idx = self.devices.iter().position(|d| d.endpoint == endpoint)?;
        Some(self.devices.remove(idx))
    }

    pub fn remove_all(&mut self, device_ids: &[String]) -> usize {
        let before = self.devices.len();
        self.devices.retain(|d| !device_ids.contains(&d.device_id));
        before - self.devices.len()
    }

    pub fn touch(&mut self, device_ids: &[String], now: DateTime<Utc>) {
        for device in self
            .devices
            .iter_mut()
            .filter(|d| device_ids.contains(&d.device_id))
        {
            device.last_active = now;
        }
    }
}
