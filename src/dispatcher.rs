//! Reactive dispatcher (spec.md §4.F): a thin typed-event layer over a
//! `JournalReader`. Replaces the original's fluent rx-observable pipeline
//! with a plain tag-indexed handler registry (spec.md §9 design note:
//! "no lazy observable machinery required").

use std::collections::HashMap;

use crate::core::{ReadFrame, Result};
use crate::journal::JournalReader;
use crate::protocol::WireRecord;

pub type Handler = Box<dyn FnMut(&ReadFrame) + 'static>;

/// Turns a merged frame stream into dispatch callbacks. One "any frame"
/// hook runs ahead of every tag-specific subscriber on each dispatched
/// frame, mirroring the original master's handler registration order where
/// the catch-all session/sqlizer mirror is wired before `Ping`/`Register`/etc.
pub struct EventBus {
    reader: JournalReader,
    any_frame: Vec<Handler>,
    by_tag: HashMap<u32, Vec<Handler>>,
}

impl EventBus {
    pub fn new(reader: JournalReader) -> Self {
        Self { reader, any_frame: Vec::new(), by_tag: HashMap::new() }
    }

    /// Registers a handler that runs on every dispatched frame, regardless
    /// of tag, before any tag-specific subscriber.
    pub fn subscribe_any(&mut self, handler: impl FnMut(&ReadFrame) + 'static) {
        self.any_frame.push(Box::new(handler));
    }

    /// Registers a handler filtered to frames whose `msg_type == tag`.
    /// Handlers for the same tag run in registration order.
    pub fn subscribe(&mut self, tag: u32, handler: impl FnMut(&ReadFrame) + 'static) {
        self.by_tag.entry(tag).or_default().push(Box::new(handler));
    }

    /// Registers a handler filtered to frames whose payload decodes as `T`.
    /// Frames that fail to decode as `T` are silently skipped for this
    /// handler (they may still match other subscribers).
    pub fn subscribe_decoded<T: WireRecord + 'static>(&mut self, tag: u32, mut handler: impl FnMut(&T, &ReadFrame) + 'static) {
        self.subscribe(tag, move |frame| {
            if let Ok(value) = T::decode(&frame.payload) {
                handler(&value, frame);
            }
        });
    }

    /// True if `frame.msg_type == tag` (the `is(tag)` combinator).
    pub fn is(tag: u32, frame: &ReadFrame) -> bool {
        frame.header.msg_type == tag
    }

    /// True if `frame`'s payload decodes as `T` (the `of::<T>()` combinator).
    pub fn of<T: WireRecord>(frame: &ReadFrame) -> bool {
        T::decode(&frame.payload).is_ok()
    }

    /// Pumps one frame through the registry, if one is available.
    /// Returns `true` if a frame was dispatched.
    pub fn poll_once(&mut self) -> Result<bool> {
        let frame = match self.reader.next()? {
            Some(frame) => frame,
            None => return Ok(false),
        };
        for handler in &mut self.any_frame {
            handler(&frame);
        }
        if let Some(handlers) = self.by_tag.get_mut(&frame.header.msg_type) {
            for handler in handlers {
                handler(&frame);
            }
        }
        Ok(true)
    }

    /// Pumps every currently-available frame through the registry.
    pub fn drain(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.poll_once()? {
            count += 1;
        }
        Ok(count)
    }

    pub fn reader_mut(&mut self) -> &mut JournalReader {
        &mut self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalWriter;
    use crate::protocol::{MsgType, Ping};
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::tempdir;

    #[test]
    fn any_frame_runs_before_tag_specific_handler() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::new(dir.path().to_path_buf(), 1);
        writer.write(0, 10, 10, MsgType::Ping.as_u32(), &Ping { nonce: 5 }.encode()).unwrap();
        writer.finish_all().unwrap();

        let mut reader = JournalReader::new();
        reader.join(dir.path().to_path_buf(), 1, 0);
        let mut bus = EventBus::new(reader);

        let order = Rc::new(RefCell::new(Vec::new()));
        let order_any = Rc::clone(&order);
        bus.subscribe_any(move |_| order_any.borrow_mut().push("any"));
        let order_tag = Rc::clone(&order);
        bus.subscribe(MsgType::Ping.as_u32(), move |_| order_tag.borrow_mut().push("ping"));

        assert_eq!(bus.drain().unwrap(), 1);
        assert_eq!(*order.borrow(), vec!["any", "ping"]);
    }

    #[test]
    fn subscribe_decoded_only_fires_for_matching_payload() {
        let dir = tempdir().unwrap();
        let mut writer = JournalWriter::new(dir.path().to_path_buf(), 1);
        writer.write(0, 10, 10, MsgType::Ping.as_u32(), &Ping { nonce: 9 }.encode()).unwrap();
        writer.finish_all().unwrap();

        let mut reader = JournalReader::new();
        reader.join(dir.path().to_path_buf(), 1, 0);
        let mut bus = EventBus::new(reader);

        let seen = Rc::new(RefCell::new(None));
        let seen2 = Rc::clone(&seen);
        bus.subscribe_decoded::<Ping>(MsgType::Ping.as_u32(), move |ping, _frame| {
            *seen2.borrow_mut() = Some(ping.nonce);
        });
        bus.drain().unwrap();
        assert_eq!(*seen.borrow(), Some(9));
    }
}
