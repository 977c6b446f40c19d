//! Register-level model of a PIO IDE controller with up to two drives.
//!
//! Commands execute instantly. A read raises the interrupt as soon as its
//! data is buffered; a write raises it once all data has been written to the
//! data port. Interrupts are collected in a counter that an interrupt thread
//! drains with [`SimIde::wait_irq`].

use super::lock;
use crate::hal::hardware::{
    ide::{
        IdeStatus, IDE_CMD_RDMUL, IDE_CMD_READ, IDE_CMD_WRITE, IDE_CMD_WRMUL, IDE_COMMAND,
        IDE_DATA, IDE_DRIVE, IDE_LBA_HIGH, IDE_LBA_LOW, IDE_LBA_MID, IDE_SECTOR_COUNT,
        IDE_STATUS, SECTOR_SIZE,
    },
    PortIo,
};
use log::warn;
use std::{
    sync::{Condvar, Mutex},
    vec::Vec,
};

/// A command the controller accepted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub write: bool,
    pub drive: usize,
    pub lba: u32,
    pub count: u8,
}

struct PendingWrite {
    drive: usize,
    offset: usize,
    data: Vec<u8>,
    len: usize,
}

#[derive(Default)]
struct State {
    drives: [Option<Vec<u8>>; 2],
    selected: usize,
    count: u8,
    lba: [u8; 4],
    error: bool,
    fail_next: bool,
    read_data: Vec<u8>,
    read_pos: usize,
    write: Option<PendingWrite>,
    irqs: usize,
    held: bool,
    shutdown: bool,
    log: Vec<Command>,
}
impl State {
    fn lba(&self) -> u32 {
        u32::from_le_bytes(self.lba)
    }
    fn raise(&mut self, cv: &Condvar) {
        self.irqs += 1;
        cv.notify_all();
    }
    /// Byte range of the current command, if it addresses an existing drive.
    fn range(&self, lba: u32, count: u8) -> Option<(usize, usize)> {
        let image = self.drives[self.selected].as_ref()?;
        let start = lba as usize * SECTOR_SIZE;
        let end = start + count as usize * SECTOR_SIZE;
        (end <= image.len()).then_some((start, end))
    }
}

pub struct SimIde {
    state: Mutex<State>,
    irq: Condvar,
}
impl SimIde {
    /// A controller with drive 0 and, optionally, drive 1.
    pub fn new(disk0: Vec<u8>, disk1: Option<Vec<u8>>) -> SimIde {
        SimIde {
            state: Mutex::new(State {
                drives: [Some(disk0), disk1],
                ..State::default()
            }),
            irq: Condvar::new(),
        }
    }
    /// Copy of the image behind `drive`.
    pub fn image(&self, drive: usize) -> Vec<u8> {
        lock(&self.state).drives[drive].clone().unwrap_or_default()
    }
    /// Every command accepted so far, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        lock(&self.state).log.clone()
    }
    /// Make the next command fail with ERR set.
    pub fn fail_next(&self) {
        lock(&self.state).fail_next = true;
    }
    /// Stop delivering interrupts until `release_irqs`.
    pub fn hold_irqs(&self) {
        lock(&self.state).held = true;
    }
    pub fn release_irqs(&self) {
        lock(&self.state).held = false;
        self.irq.notify_all();
    }
    /// Wake the interrupt thread for good.
    pub fn shutdown(&self) {
        lock(&self.state).shutdown = true;
        self.irq.notify_all();
    }
    /// Block until an interrupt is raised. Returns false after `shutdown`.
    pub fn wait_irq(&self) -> bool {
        let mut state = lock(&self.state);
        while !state.shutdown && (state.held || state.irqs == 0) {
            state = self
                .irq
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        if state.shutdown {
            return false;
        }
        state.irqs -= 1;
        true
    }

    fn command(&self, state: &mut State, cmd: u8) {
        let write = match cmd {
            IDE_CMD_READ | IDE_CMD_RDMUL => false,
            IDE_CMD_WRITE | IDE_CMD_WRMUL => true,
            _ => {
                warn!("simide: unknown command {:#04x}", cmd);
                return;
            }
        };
        let (lba, count) = (state.lba(), state.count);
        state.log.push(Command {
            write,
            drive: state.selected,
            lba,
            count,
        });
        let range = state.range(lba, count);
        state.error = core::mem::take(&mut state.fail_next) || range.is_none();
        let (start, end) = range.unwrap_or((0, 0));

        if write {
            state.write = Some(PendingWrite {
                drive: state.selected,
                offset: start,
                data: Vec::new(),
                len: count as usize * SECTOR_SIZE,
            });
        } else {
            state.read_data = match (&state.drives[state.selected], state.error) {
                (Some(image), false) => image[start..end].to_vec(),
                _ => Vec::new(),
            };
            state.read_pos = 0;
            state.raise(&self.irq);
        }
    }
}
impl PortIo for SimIde {
    fn inb(&self, port: u16) -> u8 {
        let state = lock(&self.state);
        match port {
            IDE_STATUS if state.drives[state.selected].is_none() => 0,
            IDE_STATUS => {
                let mut status = IdeStatus::DRDY;
                if state.error {
                    status |= IdeStatus::ERR;
                }
                if state.write.is_some() {
                    status |= IdeStatus::DRQ;
                }
                status.bits()
            }
            _ => 0,
        }
    }
    fn outb(&self, port: u16, value: u8) {
        let mut state = lock(&self.state);
        match port {
            IDE_SECTOR_COUNT => state.count = value,
            IDE_LBA_LOW => state.lba[0] = value,
            IDE_LBA_MID => state.lba[1] = value,
            IDE_LBA_HIGH => state.lba[2] = value,
            IDE_DRIVE => {
                state.selected = ((value >> 4) & 1) as usize;
                state.lba[3] = value & 0x0f;
            }
            IDE_COMMAND => self.command(&mut state, value),
            _ => {}
        }
    }
    fn insl(&self, port: u16, buf: &mut [u8]) {
        let mut state = lock(&self.state);
        if port != IDE_DATA {
            return;
        }
        let start = state.read_pos;
        let n = buf.len().min(state.read_data.len().saturating_sub(start));
        buf[..n].copy_from_slice(&state.read_data[start..start + n]);
        state.read_pos += n;
    }
    fn outsl(&self, port: u16, buf: &[u8]) {
        let mut state = lock(&self.state);
        if port != IDE_DATA {
            return;
        }
        let Some(mut write) = state.write.take() else {
            return;
        };
        write.data.extend_from_slice(buf);
        if write.data.len() < write.len {
            state.write = Some(write);
            return;
        }
        if !state.error {
            if let Some(image) = state.drives[write.drive].as_mut() {
                image[write.offset..write.offset + write.len]
                    .copy_from_slice(&write.data[..write.len]);
            }
        }
        state.raise(&self.irq);
    }
}
