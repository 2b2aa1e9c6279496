//! Typed PLC link over a raw transport

use std::time::Duration;

use super::{with_busy_retry, ControlBits, PlcError, PlcTransport, RegisterBlock, RegisterLayout};

/// Typed access to the scanner's data block.
///
/// Keeps a shadow of the control byte so that setting one bit (lamp) never
/// clobbers another (counter reset). The shadow starts at `ALARM_ENABLE`;
/// call [`sync_control`](Self::sync_control) after connecting to adopt what
/// the PLC actually holds.
pub struct PlcLink {
    transport: Box<dyn PlcTransport>,
    layout: RegisterLayout,
    data_block: u16,
    control: ControlBits,
    busy_retries: u32,
    busy_backoff: Duration,
}

impl PlcLink {
    /// Wrap a transport. Fails if the layout is malformed.
    pub fn new(
        transport: Box<dyn PlcTransport>,
        layout: RegisterLayout,
        data_block: u16,
    ) -> Result<Self, PlcError> {
        let errors = layout.validate();
        if !errors.is_empty() {
            return Err(PlcError::Layout(errors));
        }
        Ok(Self {
            transport,
            layout,
            data_block,
            control: ControlBits(ControlBits::ALARM_ENABLE),
            busy_retries: 0,
            busy_backoff: Duration::ZERO,
        })
    }

    pub const fn with_busy_retry(mut self, retries: u32, backoff: Duration) -> Self {
        self.busy_retries = retries;
        self.busy_backoff = backoff;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Control bits as last written.
    pub const fn control(&self) -> ControlBits {
        self.control
    }

    /// Read the control byte as the PLC currently holds it.
    pub fn read_control(&mut self) -> Result<ControlBits, PlcError> {
        let (db, offset) = (self.data_block, self.layout.control);
        let transport = &mut self.transport;
        let bytes = with_busy_retry(self.busy_retries, self.busy_backoff, || {
            transport.read_area(db, offset, 1)
        })?;
        bytes
            .first()
            .copied()
            .map(ControlBits)
            .ok_or_else(|| PlcError::Io("empty control byte read".to_string()))
    }

    /// Seed the shadow from the PLC's control byte. Reset bits are never
    /// carried over, so a reset interrupted by a dropped link is not
    /// re-asserted by the next lamp write.
    pub fn sync_control(&mut self) -> Result<ControlBits, PlcError> {
        let bits = self.read_control()?.with(ControlBits::RESET_COUNTERS, false);
        self.control = bits;
        Ok(bits)
    }

    /// Read and decode the whole block.
    pub fn read_block(&mut self) -> Result<RegisterBlock, PlcError> {
        let (db, len) = (self.data_block, self.layout.block_size);
        let transport = &mut self.transport;
        let bytes = with_busy_retry(self.busy_retries, self.busy_backoff, || {
            transport.read_area(db, 0, len)
        })?;
        self.layout.decode(&bytes)
    }

    /// Write the whole control byte.
    pub fn write_control(&mut self, bits: ControlBits) -> Result<(), PlcError> {
        let (db, offset) = (self.data_block, self.layout.control);
        let transport = &mut self.transport;
        with_busy_retry(self.busy_retries, self.busy_backoff, || {
            transport.write_area(db, offset, &[bits.0])
        })?;
        self.control = bits;
        Ok(())
    }

    /// Assert or clear both counter reset bits.
    pub fn set_counter_reset(&mut self, asserted: bool) -> Result<(), PlcError> {
        self.write_control(self.control.with(ControlBits::RESET_COUNTERS, asserted))
    }

    /// Switch the common-fault lamp.
    pub fn set_common_fault(&mut self, on: bool) -> Result<(), PlcError> {
        self.write_control(self.control.with(ControlBits::COMMON_FAULT, on))
    }

    /// Write the scanner's lump/neck detection thresholds (mm).
    pub fn write_thresholds(&mut self, lump: f32, neck: f32) -> Result<(), PlcError> {
        let db = self.data_block;
        let writes = [
            (self.layout.lump_threshold, lump),
            (self.layout.neck_threshold, neck),
        ];
        let transport = &mut self.transport;
        for (offset, value) in writes {
            with_busy_retry(self.busy_retries, self.busy_backoff, || {
                transport.write_area(db, offset, &value.to_be_bytes())
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PlcLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlcLink")
            .field("data_block", &self.data_block)
            .field("control", &self.control)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::{PlcConnector, SimProfile, SimulatedConnector, SimulatedPlc};

    fn link(plc: &SimulatedPlc) -> PlcLink {
        let transport = SimulatedConnector::new(plc.clone())
            .connect("sim://test")
            .unwrap();
        PlcLink::new(transport, RegisterLayout::default(), 1).unwrap()
    }

    #[test]
    fn malformed_layout_is_rejected() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let transport = SimulatedConnector::new(plc).connect("sim://test").unwrap();
        let layout = RegisterLayout {
            lumps: 17,
            ..RegisterLayout::default()
        };
        assert!(matches!(
            PlcLink::new(transport, layout, 1),
            Err(PlcError::Layout(_))
        ));
    }

    #[test]
    fn lamp_write_keeps_reset_bits() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut link = link(&plc);

        link.set_counter_reset(true).unwrap();
        link.set_common_fault(true).unwrap();

        let control = plc.control();
        assert!(control.contains(ControlBits::RESET_COUNTERS));
        assert!(control.contains(ControlBits::COMMON_FAULT));
    }

    #[test]
    fn thresholds_are_echoed_in_the_block() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut link = link(&plc);

        link.write_thresholds(0.25, 0.5).unwrap();
        let block = link.read_block().unwrap();
        assert_eq!(block.lump_threshold, 0.25);
        assert_eq!(block.neck_threshold, 0.5);
    }

    #[test]
    fn sync_control_adopts_lamp_and_drops_reset_bits() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut first = link(&plc);
        first.set_common_fault(true).unwrap();
        first.set_counter_reset(true).unwrap();

        let mut second = link(&plc);
        assert!(!second.control().contains(ControlBits::COMMON_FAULT));
        let bits = second.sync_control().unwrap();
        assert!(bits.contains(ControlBits::COMMON_FAULT));
        assert!(!bits.contains(ControlBits::RESET_COUNTERS));

        // a later reset pulse leaves the lamp alone
        second.set_counter_reset(true).unwrap();
        second.set_counter_reset(false).unwrap();
        assert!(plc.control().contains(ControlBits::COMMON_FAULT));
    }

    #[test]
    fn read_control_fails_on_dropped_link() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut link = link(&plc);
        assert!(link.read_control().is_ok());
        plc.drop_connection();
        assert!(link.read_control().is_err());
    }

    #[test]
    fn busy_replies_are_absorbed_by_retries() {
        let plc = SimulatedPlc::new(SimProfile::quiet(), 1);
        let mut link = link(&plc).with_busy_retry(3, Duration::ZERO);

        plc.inject_busy(2);
        assert!(link.read_block().is_ok());

        plc.inject_busy(5);
        assert!(matches!(link.read_block(), Err(PlcError::Io(_))));
    }
}
