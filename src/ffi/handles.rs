//! Generation-checked handle tables backing the opaque C handles.
//!
//! A handle packs `slot index + 1` into the low 32 bits and the slot's
//! generation into the high 32 bits, so `0` is never a valid handle and a
//! handle to a freed slot stops resolving once the slot is reused.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::engine::Engine;
use crate::voice::VoiceEmbedding;

static ENGINES: Lazy<Mutex<HandleTable<Arc<Engine>>>> = Lazy::new(|| Mutex::new(HandleTable::new()));
static VOICES: Lazy<Mutex<HandleTable<VoiceEmbedding>>> = Lazy::new(|| Mutex::new(HandleTable::new()));

pub(crate) fn engines() -> &'static Mutex<HandleTable<Arc<Engine>>> {
    &ENGINES
}

pub(crate) fn voices() -> &'static Mutex<HandleTable<VoiceEmbedding>> {
    &VOICES
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, value: T) -> u64 {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        encode(index, slot.generation)
    }

    pub fn get(&self, handle: u64) -> Option<&T> {
        let (index, generation) = decode(handle)?;
        let slot = self.slots.get(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn remove(&mut self, handle: u64) -> Option<T> {
        let (index, generation) = decode(handle)?;
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }
}

fn encode(index: u32, generation: u32) -> u64 {
    (u64::from(generation) << 32) | (u64::from(index) + 1)
}

fn decode(handle: u64) -> Option<(u32, u32)> {
    let low = handle as u32;
    if low == 0 {
        return None;
    }
    Some((low - 1, (handle >> 32) as u32))
}
