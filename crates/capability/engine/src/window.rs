//! 按设备划分的滑动窗口。
//!
//! 外层 map 只在新设备出现时取写锁；追加与清空只锁对应设备的列表。

use domain::DeviceMessage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use uuid::Uuid;

type WindowSlot = Arc<Mutex<Vec<DeviceMessage>>>;

fn lock(slot: &WindowSlot) -> MutexGuard<'_, Vec<DeviceMessage>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 设备窗口集合。
#[derive(Default)]
pub struct DeviceWindows {
    slots: RwLock<HashMap<Uuid, WindowSlot>>,
}

impl DeviceWindows {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, device_id: Uuid) -> WindowSlot {
        let existing = self
            .slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&device_id)
            .cloned();
        match existing {
            Some(slot) => slot,
            None => self
                .slots
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .entry(device_id)
                .or_default()
                .clone(),
        }
    }

    /// 追加到消息所属设备的窗口（不存在则创建）；返回追加后的长度。
    pub fn append(&self, message: DeviceMessage) -> usize {
        let slot = self.slot(message.device_id);
        let mut entries = lock(&slot);
        entries.push(message);
        entries.len()
    }

    pub fn len_of(&self, device_id: Uuid) -> usize {
        let slot = self
            .slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&device_id)
            .cloned();
        slot.map(|slot| lock(&slot).len()).unwrap_or(0)
    }

    pub fn device_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// 非空窗口的快照（按设备 id 排序）。
    pub fn snapshot(&self) -> Vec<(Uuid, Vec<DeviceMessage>)> {
        let slots: Vec<(Uuid, WindowSlot)> = self
            .slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(device_id, slot)| (*device_id, slot.clone()))
            .collect();

        let mut snapshot: Vec<_> = slots
            .into_iter()
            .filter_map(|(device_id, slot)| {
                let entries = lock(&slot);
                (!entries.is_empty()).then(|| (device_id, entries.clone()))
            })
            .collect();
        snapshot.sort_by_key(|(device_id, _)| *device_id);
        snapshot
    }

    /// 清空长度超过 `capacity` 的窗口（整体清空而非截断）；返回被清空的设备。
    pub fn clear_overflowing(&self, capacity: usize) -> Vec<Uuid> {
        let slots: Vec<(Uuid, WindowSlot)> = self
            .slots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(device_id, slot)| (*device_id, slot.clone()))
            .collect();

        slots
            .into_iter()
            .filter_map(|(device_id, slot)| {
                let mut entries = lock(&slot);
                if entries.len() > capacity {
                    entries.clear();
                    Some(device_id)
                } else {
                    None
                }
            })
            .collect()
    }
}
