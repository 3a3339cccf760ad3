// Fleet orchestrator: binds marker ids seen by vision to robots on the radio.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::link::{Link, LinkError};
use crate::proto::ReturnCode;
use crate::proto::factory::general;
use crate::radio::BROADCAST_ID;
use crate::robot::Robot;
use crate::vision::{MarkerId, Vision, VisionError};

#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimOutcome {
    Claimed(u8),
    Refused(u8, ReturnCode),
    Unanswered(u8),
}

pub struct Fleet {
    link: Link,
    vision: Box<dyn Vision>,
    robots: BTreeMap<u8, Robot>,
    claiming: BTreeSet<u8>,
    /// Filled by claim callbacks during `poll`, drained right after.
    outcomes: Rc<RefCell<Vec<ClaimOutcome>>>,
    corners: BTreeSet<MarkerId>,
}

impl Fleet {
    pub fn new(link: Link, vision: Box<dyn Vision>, corners: impl IntoIterator<Item = MarkerId>) -> Self {
        Self {
            link,
            vision,
            robots: BTreeMap::new(),
            claiming: BTreeSet::new(),
            outcomes: Rc::new(RefCell::new(Vec::new())),
            corners: corners.into_iter().collect(),
        }
    }

    /// One tick: a vision cycle, then a radio poll.
    ///
    /// Both steps always run. The first error of the tick is returned after
    /// the tick completes, so a caller may log it and keep ticking.
    pub fn update(&mut self) -> Result<(), FleetError> {
        let mut failure = None;
        match self.vision.process_cycle() {
            Ok(new_ids) => {
                for id in new_ids {
                    if let Err(e) = self.on_new_identity(id) {
                        failure.get_or_insert(e);
                    }
                }
            }
            Err(e) => {
                failure.get_or_insert(e.into());
            }
        }
        if let Err(e) = self.link.poll() {
            failure.get_or_insert(e.into());
        }
        self.settle_claims();
        failure.map_or(Ok(()), Err)
    }

    fn on_new_identity(&mut self, marker: MarkerId) -> Result<(), FleetError> {
        if self.corners.contains(&marker) {
            return Ok(());
        }
        let id = match u8::try_from(marker) {
            Ok(id) if id != BROADCAST_ID => id,
            _ => {
                debug!(marker, "marker id outside the robot range, ignoring");
                return Ok(());
            }
        };
        if self.robots.contains_key(&id) || self.claiming.contains(&id) {
            return Ok(());
        }
        self.claim(id)
    }

    fn claim(&mut self, id: u8) -> Result<(), FleetError> {
        let cmd = match general::set_id(id) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(id, error = %e, "cannot claim id");
                return Ok(());
            }
        };
        let answered = self.outcomes.clone();
        let unanswered = self.outcomes.clone();
        let sent = self.link.broadcast(
            cmd,
            Box::new(move |_, resp| {
                let outcome = match resp.return_code() {
                    ReturnCode::Success => ClaimOutcome::Claimed(id),
                    code => ClaimOutcome::Refused(id, code),
                };
                answered.borrow_mut().push(outcome);
            }),
            Some(Box::new(move |_, _| {
                unanswered.borrow_mut().push(ClaimOutcome::Unanswered(id))
            })),
        );
        match sent {
            Ok(mid) => {
                self.claiming.insert(id);
                info!(id, mid, "claiming identity");
                Ok(())
            }
            Err(e) => {
                // Released so the marker is offered again on its next sighting.
                warn!(id, error = %e, "identity claim not sent");
                self.vision.untrack(MarkerId::from(id));
                Err(e.into())
            }
        }
    }

    fn settle_claims(&mut self) {
        let outcomes: Vec<ClaimOutcome> = self.outcomes.borrow_mut().drain(..).collect();
        for outcome in outcomes {
            match outcome {
                ClaimOutcome::Claimed(id) => {
                    self.claiming.remove(&id);
                    match Robot::connect(id, &mut self.link) {
                        Ok(mut robot) => {
                            robot.attach_vision(self.vision.as_mut());
                            self.robots.insert(id, robot);
                            let slot = self.link.registration(id).map(|r| r.slot);
                            info!(id, ?slot, "robot joined the fleet");
                        }
                        Err(e) => {
                            warn!(id, error = %e, "claimed robot could not be registered");
                            self.vision.untrack(MarkerId::from(id));
                        }
                    }
                }
                ClaimOutcome::Refused(id, code) => {
                    self.claiming.remove(&id);
                    warn!(id, ?code, "identity claim refused");
                    self.vision.untrack(MarkerId::from(id));
                }
                ClaimOutcome::Unanswered(id) => {
                    self.claiming.remove(&id);
                    debug!(id, "no robot answered claim");
                    self.vision.untrack(MarkerId::from(id));
                }
            }
        }
    }

    /// Drops a robot; its marker will be claimed again when next seen.
    pub fn remove_robot(&mut self, id: u8) -> bool {
        let Some(mut robot) = self.robots.remove(&id) else {
            return false;
        };
        robot.detach_vision(self.vision.as_mut());
        self.link.unregister(id);
        self.vision.untrack(MarkerId::from(id));
        info!(id, "robot left the fleet");
        true
    }

    pub fn robot(&self, id: u8) -> Option<&Robot> {
        self.robots.get(&id)
    }

    pub fn robots(&self) -> impl Iterator<Item = &Robot> {
        self.robots.values()
    }

    pub fn is_claiming(&self, id: u8) -> bool {
        self.claiming.contains(&id)
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn vision(&self) -> &dyn Vision {
        self.vision.as_ref()
    }
}
