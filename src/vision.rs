// Pose source: tracks which marker ids are known and fans poses out to listeners.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::pose::Pose;
use crate::port::LineBuffer;

/// Upper bound on lines consumed per cycle so a flooding feed cannot stall the loop.
const MAX_LINES_PER_CYCLE: usize = 256;

pub type MarkerId = u32;
pub type PoseListener = Box<dyn FnMut(Pose)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerHandle(u64);

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("pose feed i/o: {0}")]
    Io(#[from] io::Error),
    #[error("malformed pose line: {0}")]
    BadLine(String),
}

pub trait Vision {
    /// One detection cycle. Returns ids that became tracked during it.
    fn process_cycle(&mut self) -> Result<Vec<MarkerId>, VisionError>;
    fn add_pose_listener(&mut self, id: MarkerId, listener: PoseListener) -> ListenerHandle;
    fn remove_pose_listener(&mut self, id: MarkerId, handle: ListenerHandle) -> bool;
    /// Forget `id` so its next sighting is reported as new again.
    fn untrack(&mut self, id: MarkerId);
    fn is_tracked(&self, id: MarkerId) -> bool;
}

/// Tracked ids and their listeners, independent of where poses come from.
#[derive(Default)]
pub struct Tracker {
    tracked: BTreeSet<MarkerId>,
    listeners: BTreeMap<MarkerId, Vec<(ListenerHandle, PoseListener)>>,
    next_handle: u64,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one sighting. Returns true when `id` was not tracked before.
    pub fn observe(&mut self, id: MarkerId, pose: Pose) -> bool {
        let new = self.tracked.insert(id);
        if let Some(listeners) = self.listeners.get_mut(&id) {
            for (_, listener) in listeners.iter_mut() {
                listener(pose);
            }
        }
        new
    }

    pub fn add_listener(&mut self, id: MarkerId, listener: PoseListener) -> ListenerHandle {
        self.next_handle += 1;
        let handle = ListenerHandle(self.next_handle);
        self.listeners
            .entry(id)
            .or_default()
            .push((handle, listener));
        handle
    }

    pub fn remove_listener(&mut self, id: MarkerId, handle: ListenerHandle) -> bool {
        let Some(listeners) = self.listeners.get_mut(&id) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(h, _)| *h != handle);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.listeners.remove(&id);
        }
        removed
    }

    pub fn untrack(&mut self, id: MarkerId) {
        self.tracked.remove(&id);
    }

    pub fn is_tracked(&self, id: MarkerId) -> bool {
        self.tracked.contains(&id)
    }
}

/// Reads `POSE id=<n> x=<mm> y=<mm> angle=<deg>` lines from a tracker feed.
pub struct LineVision<R> {
    feed: R,
    lines: LineBuffer,
    tracker: Tracker,
}

impl<R: Read> LineVision<R> {
    pub fn new(feed: R) -> Self {
        Self {
            feed,
            lines: LineBuffer::new(),
            tracker: Tracker::new(),
        }
    }
}

impl<R: Read> Vision for LineVision<R> {
    fn process_cycle(&mut self) -> Result<Vec<MarkerId>, VisionError> {
        let mut new_ids = Vec::new();
        for _ in 0..MAX_LINES_PER_CYCLE {
            let line = match self.lines.read_line(&mut self.feed, Duration::ZERO) {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    // Nobody will hear about these ids; report them again later.
                    for id in new_ids {
                        self.tracker.untrack(id);
                    }
                    return Err(e.into());
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_pose_line(&line) {
                Ok((id, pose)) => {
                    trace!(id, %pose, "pose");
                    if self.tracker.observe(id, pose) {
                        debug!(id, "new marker tracked");
                        new_ids.push(id);
                    }
                }
                Err(e) => warn!(error = %e, "skipping pose line"),
            }
        }
        Ok(new_ids)
    }

    fn add_pose_listener(&mut self, id: MarkerId, listener: PoseListener) -> ListenerHandle {
        self.tracker.add_listener(id, listener)
    }

    fn remove_pose_listener(&mut self, id: MarkerId, handle: ListenerHandle) -> bool {
        self.tracker.remove_listener(id, handle)
    }

    fn untrack(&mut self, id: MarkerId) {
        debug!(id, "marker untracked");
        self.tracker.untrack(id);
    }

    fn is_tracked(&self, id: MarkerId) -> bool {
        self.tracker.is_tracked(id)
    }
}

pub fn parse_pose_line(line: &str) -> Result<(MarkerId, Pose), VisionError> {
    let bad = || VisionError::BadLine(line.to_string());
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("POSE") {
        return Err(bad());
    }

    let (mut id, mut x, mut y, mut angle) = (None, None, None, None);
    for tok in tokens {
        let (k, v) = tok.split_once('=').ok_or_else(bad)?;
        match k {
            "id" => id = Some(v.parse::<MarkerId>().map_err(|_| bad())?),
            "x" => x = Some(v.parse::<f64>().map_err(|_| bad())?),
            "y" => y = Some(v.parse::<f64>().map_err(|_| bad())?),
            "angle" => angle = Some(v.parse::<f64>().map_err(|_| bad())?),
            _ => {}
        }
    }
    match (id, x, y, angle) {
        (Some(id), Some(x), Some(y), Some(angle)) => Ok((id, Pose::new(x, y, angle))),
        _ => Err(bad()),
    }
}
