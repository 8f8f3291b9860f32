use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::FanoutConfig;
use crate::error::PaymentError;
use crate::models::{Device, DeviceInfo, DeviceList, PushSubscription, Registration};
use crate::services::CacheService;

pub struct DeviceRepository {
    cache: Arc<CacheService>,
    max_devices: usize,
    ttl_secs: u64,
    // serializes read-modify-write of device lists
    write_lock: Mutex<()>,
}

impl DeviceRepository {
    pub fn new(cache: Arc<CacheService>, config: &FanoutConfig) -> Self {
        Self {
            cache,
            max_devices: config.max_devices_per_user,
            ttl_secs: config.device_ttl.as_secs(),
            write_lock: Mutex::new(()),
        }
    }

    fn key(user_id: &str) -> String {
        format!("push:devices:{}", user_id)
    }

    pub async fn list(&self, user_id: &str) -> Result<DeviceList, PaymentError> {
        self.cache
            .get::<DeviceList>(&Self::key(user_id))
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| PaymentError::Cache(e.to_string()))
    }

    pub async fn active_devices(&self, user_id: &str) -> Result<Vec<Device>, PaymentError> {
        Ok(self.list(user_id).await?.active().cloned().collect())
    }

    async fn save(&self, user_id: &str, list: &DeviceList) -> Result<(), PaymentError> {
        let key = Self::key(user_id);
        let result = if list.is_empty() {
            self.cache.delete(&key).await
        } else {
            self.cache.set(&key, list, self.ttl_secs).await
        };
        result.map_err(|e| PaymentError::Cache(e.to_string()))
    }

    pub async fn register(
        &self,
        user_id: &str,
        subscription: PushSubscription,
        info: DeviceInfo,
    ) -> Result<(Registration, usize), PaymentError> {
        if subscription.endpoint.trim().is_empty() {
            return Err(PaymentError::InvalidRequest(
                "subscription endpoint is required".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let mut list = self.list(user_id).await?;
        let registration = list.register(subscription, info, self.max_devices, Utc::now());
        self.save(user_id, &list).await?;

        if let Some(evicted) = &registration.evicted {
            tracing::info!(
                user_id = user_id,
                device_id = %evicted.device_id,
                "Evicted least recently active device"
            );
        }
        tracing::info!(
            user_id = user_id,
            device_id = %registration.device_id,
            refreshed = registration.refreshed,
            device_count = list.len(),
            "Push device registered"
        );

        Ok((registration, list.len()))
    }

    pub async fn unregister(&self, user_id: &str, device_id: &str) -> Result<usize, PaymentError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.list(user_id).await?;
        list.remove(device_id)
            .ok_or_else(|| PaymentError::DeviceNotFound(device_id.to_string()))?;
        self.save(user_id, &list).await?;
        Ok(list.len())
    }

    pub async fn unregister_endpoint(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<usize, PaymentError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.list(user_id).await?;
        list.remove_endpoint(endpoint)
            .ok_or_else(|| PaymentError::DeviceNotFound(endpoint.to_string()))?;
        self.save(user_id, &list).await?;
        Ok(list.len())
    }

    pub async fn unregister_all(&self, user_id: &str) -> Result<usize, PaymentError> {
        let _guard = self.write_lock.lock().await;
        let removed = self.list(user_id).await?.len();
        self.save(user_id, &DeviceList::default()).await?;
        tracing::info!(user_id = user_id, removed, "All push devices removed");
        Ok(removed)
    }

    /// Applies the outcome of one fan-out in a single write: attempted devices
    /// get `last_active` refreshed, dead endpoints are dropped.
    pub async fn record_delivery(
        &self,
        user_id: &str,
        attempted: &[String],
        invalid: &[String],
    ) -> Result<usize, PaymentError> {
        let _guard = self.write_lock.lock().await;
        let mut list = self.list(user_id).await?;
        list.touch(attempted, Utc::now());
        let removed = list.remove_all(invalid);
        self.save(user_id, &list).await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubscriptionKeys;

    fn repo() -> DeviceRepository {
        DeviceRepository::new(
            Arc::new(CacheService::memory_only()),
            &FanoutConfig::default(),
        )
    }

    fn subscription(n: usize) -> PushSubscription {
        PushSubscription {
            endpoint: format!("https://push.example.com/{n}"),
            keys: SubscriptionKeys {
                p256dh: "k".into(),
                auth: "a".into(),
            },
        }
    }

    #[tokio::test]
    async fn register_then_unregister() {
        let repo = repo();
        let (reg, count) = repo
            .register("u1", subscription(1), DeviceInfo::default())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let remaining = repo.unregister("u1", &reg.device_id).await.unwrap();
        assert_eq!(remaining, 0);
        assert!(repo.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_device_is_reported() {
        let repo = repo();
        let err = repo.unregister("u1", "nope").await.unwrap_err();
        assert!(matches!(err, PaymentError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn cap_holds_across_registrations() {
        let repo = repo();
        for n in 0..11 {
            repo.register("u1", subscription(n), DeviceInfo::default())
                .await
                .unwrap();
        }
        let list = repo.list("u1").await.unwrap();
        assert_eq!(list.len(), 10);
        assert!(list
            .devices()
            .iter()
            .all(|d| d.endpoint != subscription(0).endpoint));
    }

    #[tokio::test]
    async fn record_delivery_prunes_in_one_batch() {
        let repo = repo();
        let mut ids = Vec::new();
        for n in 0..3 {
            let (reg, _) = repo
                .register("u1", subscription(n), DeviceInfo::default())
                .await
                .unwrap();
            ids.push(reg.device_id);
        }

        let removed = repo
            .record_delivery("u1", &ids, &ids[1..])
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(repo.list("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unregister_all_empties_list() {
        let repo = repo();
        repo.register("u1", subscription(1), DeviceInfo::default())
            .await
            .unwrap();
        repo.register("u1", subscription(2), DeviceInfo::default())
            .await
            .unwrap();

        assert_eq!(repo.unregister_all("u1").await.unwrap(), 2);
        assert!(repo.active_devices("u1").await.unwrap().is_empty());
    }
}
