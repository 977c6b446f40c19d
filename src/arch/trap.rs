//! Device interrupt dispatch.

use log::warn;

/// Legacy IRQ line of the primary IDE channel.
pub const IRQ_IDE: usize = 14;

/// A device whose interrupt line is dispatched by [`devintr`].
///
/// Handlers run in interrupt context: they must not sleep.
pub trait InterruptHandler: Sync {
    fn interrupt(&self);
}

/// Hand `irq` to the device registered for it.
///
/// Returns false if no device claims the line.
pub fn devintr(irq: usize, devices: &[(usize, &dyn InterruptHandler)]) -> bool {
    let mut handled = false;
    for (device_irq, device) in devices {
        if irq == *device_irq {
            handled = true;
            device.interrupt();
        }
    }
    if !handled {
        warn!("unexpected interrupt irq={}", irq);
    }
    handled
}
