use std::mem::{offset_of, size_of};

use tender_common::hypercall::{DeviceKind, DeviceRecord, HypercallPage, MAX_DEVICES};
use tracing::{debug, instrument, Span};

use super::guest_mem::GuestMemory;
use super::layout::GuestLayout;
use super::ptr_offset::Offset;
use crate::error::TenderError::{TooManyDevices, UnknownDeviceKind};
use crate::{log_then_return, Result};

/// Writes the device table into the hypercall page.
///
/// This is how a guest learns which host descriptor each of its devices is
/// bound to: the sandbox policy only allows device I/O on exactly those
/// descriptors.
pub struct HypercallPageBuilder;

fn record_offset(index: usize) -> Offset {
    GuestLayout::hypercall_page_offset()
        + offset_of!(HypercallPage, devices)
        + index * size_of::<DeviceRecord>()
}

impl HypercallPageBuilder {
    /// Zero the hypercall page and publish `devices` in order
    #[instrument(err(Debug), skip_all, parent = Span::current(), level = "Trace")]
    pub fn build(memory: &mut GuestMemory, devices: &[DeviceRecord]) -> Result<()> {
        if devices.len() > MAX_DEVICES {
            log_then_return!(TooManyDevices(devices.len(), MAX_DEVICES));
        }
        let page = GuestLayout::hypercall_page_offset();
        memory.zero(page, GuestLayout::hypercall_page_size())?;
        memory.write_u64(page + offset_of!(HypercallPage, count), devices.len() as u64)?;

        for (index, device) in devices.iter().enumerate() {
            let base = record_offset(index);
            memory.write_u32(base + offset_of!(DeviceRecord, kind), device.kind)?;
            memory.write_i32(base + offset_of!(DeviceRecord, hostfd), device.hostfd)?;
            memory.write_u64(base + offset_of!(DeviceRecord, capacity), device.capacity)?;
            memory.write_u64(base + offset_of!(DeviceRecord, mtu), device.mtu)?;
            memory.copy_from_slice(&device.mac, base + offset_of!(DeviceRecord, mac))?;
            let kind = DeviceKind::from_repr(device.kind).map_or("unknown", DeviceKind::name);
            debug!("{} device {} at {}: {:?}", kind, index, base, device);
        }
        Ok(())
    }

    /// Read the device table back out of guest memory
    pub fn read(memory: &GuestMemory) -> Result<Vec<DeviceRecord>> {
        let page = GuestLayout::hypercall_page_offset();
        let count = memory.read_u64(page + offset_of!(HypercallPage, count))?;
        let count = usize::try_from(count)?;
        if count > MAX_DEVICES {
            log_then_return!(TooManyDevices(count, MAX_DEVICES));
        }
        (0..count)
            .map(|index| {
                let base = record_offset(index);
                let kind = memory.read_u32(base + offset_of!(DeviceRecord, kind))?;
                if DeviceKind::from_repr(kind).is_none() {
                    log_then_return!(UnknownDeviceKind(kind));
                }
                let mut mac = [0u8; 8];
                memory.copy_to_slice(&mut mac, base + offset_of!(DeviceRecord, mac))?;
                Ok(DeviceRecord {
                    kind,
                    hostfd: memory.read_i32(base + offset_of!(DeviceRecord, hostfd))?,
                    capacity: memory.read_u64(base + offset_of!(DeviceRecord, capacity))?,
                    mtu: memory.read_u64(base + offset_of!(DeviceRecord, mtu))?,
                    mac,
                })
            })
            .collect()
    }
}
