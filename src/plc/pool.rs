//! Per-endpoint connection cache owned by the acquisition context

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use super::{PlcConnector, PlcError, PlcLink, RegisterLayout};

/// How links opened by the pool are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub layout: RegisterLayout,
    pub data_block: u16,
    pub busy_retries: u32,
    pub busy_backoff: Duration,
}

#[derive(Default)]
struct Slot {
    link: Option<PlcLink>,
    consecutive_failures: u32,
}

/// Explicit connection pool: one cached [`PlcLink`] per endpoint.
///
/// `acquire` takes `&mut self`, so at most one connection attempt per
/// endpoint is ever in flight.
pub struct ConnectionPool {
    connector: Box<dyn PlcConnector>,
    settings: LinkSettings,
    slots: HashMap<String, Slot>,
}

impl ConnectionPool {
    pub fn new(connector: Box<dyn PlcConnector>, settings: LinkSettings) -> Self {
        Self {
            connector,
            settings,
            slots: HashMap::new(),
        }
    }

    /// Return the live link for `endpoint`, making one connection attempt if
    /// there is none or the cached one is dead.
    ///
    /// The flag is `true` when the link was opened by this call. A fresh
    /// link has its control shadow seeded from the PLC.
    pub fn acquire(&mut self, endpoint: &str) -> Result<(&mut PlcLink, bool), PlcError> {
        let slot = self.slots.entry(endpoint.to_string()).or_default();

        if slot.link.as_ref().is_some_and(|l| !l.is_connected()) {
            warn!(endpoint, "Cached PLC link is dead, dropping it");
            slot.link = None;
        }

        let fresh = slot.link.is_none();
        if fresh {
            let settings = &self.settings;
            let opened = self
                .connector
                .connect(endpoint)
                .and_then(|transport| {
                    PlcLink::new(transport, settings.layout.clone(), settings.data_block)
                })
                .and_then(|link| {
                    let mut link = link.with_busy_retry(settings.busy_retries, settings.busy_backoff);
                    link.sync_control()?;
                    Ok(link)
                });
            match opened {
                Ok(link) => {
                    info!(
                        endpoint,
                        after_failures = slot.consecutive_failures,
                        control = ?link.control(),
                        "PLC connected"
                    );
                    slot.consecutive_failures = 0;
                    slot.link = Some(link);
                }
                Err(e) => {
                    slot.consecutive_failures += 1;
                    return Err(e);
                }
            }
        }

        slot.link
            .as_mut()
            .map(|link| (link, fresh))
            .ok_or(PlcError::NotConnected)
    }

    /// The cached link for `endpoint`, without connecting.
    pub fn cached(&mut self, endpoint: &str) -> Option<&mut PlcLink> {
        self.slots.get_mut(endpoint).and_then(|s| s.link.as_mut())
    }

    /// Tear down the link for `endpoint`; the next `acquire` reconnects.
    pub fn release(&mut self, endpoint: &str) {
        if let Some(slot) = self.slots.get_mut(endpoint) {
            if slot.link.take().is_some() {
                info!(endpoint, "PLC link released");
            }
        }
    }

    pub fn is_connected(&self, endpoint: &str) -> bool {
        self.slots
            .get(endpoint)
            .and_then(|s| s.link.as_ref())
            .is_some_and(PlcLink::is_connected)
    }

    /// Failed attempts since the last successful connect.
    pub fn consecutive_failures(&self, endpoint: &str) -> u32 {
        self.slots.get(endpoint).map_or(0, |s| s.consecutive_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::{ControlBits, SimProfile, SimulatedConnector, SimulatedPlc};

    const EP: &str = "sim://pool";

    fn pool(plc: &SimulatedPlc) -> ConnectionPool {
        ConnectionPool::new(
            Box::new(SimulatedConnector::new(plc.clone())),
            LinkSettings {
                layout: RegisterLayout::default(),
                data_block: 1,
                busy_retries: 0,
                busy_backoff: Duration::ZERO,
            },
        )
    }

    #[test]
    fn acquire_reuses_cached_link() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut pool = pool(&plc);

        assert!(pool.acquire(EP).unwrap().1);
        assert!(!pool.acquire(EP).unwrap().1);
        assert_eq!(plc.connect_count(), 1);
        assert!(pool.is_connected(EP));
    }

    #[test]
    fn failures_are_counted_and_reset_on_success() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        plc.refuse_connects(2);
        let mut pool = pool(&plc);

        assert!(pool.acquire(EP).is_err());
        assert!(pool.acquire(EP).is_err());
        assert_eq!(pool.consecutive_failures(EP), 2);

        assert!(pool.acquire(EP).is_ok());
        assert_eq!(pool.consecutive_failures(EP), 0);
    }

    #[test]
    fn release_forces_reconnect() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut pool = pool(&plc);

        pool.acquire(EP).unwrap();
        pool.release(EP);
        assert!(!pool.is_connected(EP));
        pool.acquire(EP).unwrap();
        assert_eq!(plc.connect_count(), 2);
    }

    #[test]
    fn dead_link_is_replaced() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut pool = pool(&plc);

        pool.acquire(EP).unwrap();
        plc.drop_connection();
        let (_, fresh) = pool.acquire(EP).unwrap();
        assert!(fresh, "a replaced link is reported as a new connection");
        assert_eq!(plc.connect_count(), 2);
    }

    #[test]
    fn fresh_link_adopts_plc_control_byte() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut pool = pool(&plc);

        pool.acquire(EP).unwrap().0.set_common_fault(true).unwrap();
        plc.drop_connection();

        let (link, _) = pool.acquire(EP).unwrap();
        assert!(link.control().contains(ControlBits::COMMON_FAULT));
        link.set_counter_reset(true).unwrap();
        assert!(plc.control().contains(ControlBits::COMMON_FAULT));
    }
}
