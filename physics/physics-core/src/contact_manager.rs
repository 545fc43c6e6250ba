//! Contact lifetime management.
//!
//! The [`ContactManager`] owns the broad phase and every [`Contact`]. New
//! contacts come from broad phase pairs; each step they are either updated
//! or destroyed once their fixtures' fat AABBs stop overlapping.

use physics_types::Result;
use slotmap::SlotMap;
use tracing::debug;

use crate::alloc::PhysicsContext;
use crate::body::{BodyHandle, ContactLink, FixtureProxy, Rigidbody};
use crate::broad_phase::{BroadPhase, PairCallback};
use crate::contact::{Contact, ContactKey};

/// Owner of the broad phase and the contact set.
#[derive(Debug, Clone)]
pub struct ContactManager {
    broad_phase: BroadPhase<FixtureProxy>,
    contacts: SlotMap<ContactKey, Contact>,
}

/// Pair callback that turns broad phase pairs into contacts.
struct NewContacts<'a> {
    bodies: &'a mut SlotMap<BodyHandle, Rigidbody>,
    contacts: &'a mut SlotMap<ContactKey, Contact>,
}

impl NewContacts<'_> {
    fn already_linked(&self, a: FixtureProxy, b: FixtureProxy) -> bool {
        let Some(body) = self.bodies.get(b.body) else {
            return false;
        };
        body.contact_links()
            .iter()
            .filter(|link| link.other == a.body)
            .filter_map(|link| self.contacts.get(link.contact))
            .any(|c| {
                (c.fixture_a() == a && c.fixture_b() == b)
                    || (c.fixture_a() == b && c.fixture_b() == a)
            })
    }
}

impl PairCallback<FixtureProxy> for NewContacts<'_> {
    fn add_pair(&mut self, a: FixtureProxy, b: FixtureProxy) {
        if a.body == b.body || self.already_linked(a, b) {
            return;
        }

        let contact = {
            let (Some(body_a), Some(body_b)) = (self.bodies.get(a.body), self.bodies.get(b.body))
            else {
                return;
            };
            if !body_a.should_collide(body_b) {
                return;
            }
            let (Some(fixture_a), Some(fixture_b)) =
                (body_a.fixtures().get(a.fixture), body_b.fixtures().get(b.fixture))
            else {
                return;
            };
            Contact::new(
                a,
                fixture_a.shape().kind(),
                fixture_a.material(),
                b,
                fixture_b.shape().kind(),
                fixture_b.material(),
            )
        };

        let key = self.contacts.insert(contact);
        if let Some(body) = self.bodies.get_mut(a.body) {
            body.add_contact_link(ContactLink {
                other: b.body,
                contact: key,
            });
        }
        if let Some(body) = self.bodies.get_mut(b.body) {
            body.add_contact_link(ContactLink {
                other: a.body,
                contact: key,
            });
        }
        debug!(?key, "contact created");
    }
}

enum Action {
    Destroy,
    Skip,
    Update,
}

impl ContactManager {
    /// Create an empty manager whose broad phase fattens AABBs by `margin`.
    #[must_use]
    pub fn new(margin: f64) -> Self {
        Self {
            broad_phase: BroadPhase::new(margin),
            contacts: SlotMap::with_key(),
        }
    }

    /// The broad phase.
    #[must_use]
    pub fn broad_phase(&self) -> &BroadPhase<FixtureProxy> {
        &self.broad_phase
    }

    /// The broad phase, mutable (fixture creation and synchronization).
    pub fn broad_phase_mut(&mut self) -> &mut BroadPhase<FixtureProxy> {
        &mut self.broad_phase
    }

    /// A contact by key.
    #[must_use]
    pub fn contact(&self, key: ContactKey) -> Option<&Contact> {
        self.contacts.get(key)
    }

    /// A contact by key, mutable.
    pub fn contact_mut(&mut self, key: ContactKey) -> Option<&mut Contact> {
        self.contacts.get_mut(key)
    }

    /// All contacts.
    pub fn contacts(&self) -> impl Iterator<Item = (ContactKey, &Contact)> {
        self.contacts.iter()
    }

    /// Contacts and broad phase borrowed together, for the island solver.
    pub(crate) fn parts_mut(
        &mut self,
    ) -> (&mut SlotMap<ContactKey, Contact>, &mut BroadPhase<FixtureProxy>) {
        (&mut self.contacts, &mut self.broad_phase)
    }

    /// Number of live contacts.
    #[must_use]
    pub fn contact_count(&self) -> usize {
        self.contacts.len()
    }

    /// Create contacts for new broad phase pairs.
    ///
    /// Pairs on the same body, pairs already tracked and pairs where neither
    /// body is dynamic are skipped.
    pub fn find_new_contacts(&mut self, bodies: &mut SlotMap<BodyHandle, Rigidbody>) {
        let mut callback = NewContacts {
            bodies,
            contacts: &mut self.contacts,
        };
        self.broad_phase.update_pairs(&mut callback);
    }

    /// Update every contact's manifold, destroying contacts whose fat AABBs
    /// no longer overlap. Contacts between two inactive bodies keep their
    /// last manifold.
    ///
    /// # Errors
    ///
    /// Propagates scratch allocation failures from the narrow phase.
    pub fn collide(
        &mut self,
        bodies: &mut SlotMap<BodyHandle, Rigidbody>,
        ctx: &PhysicsContext,
        warm_starting: bool,
    ) -> Result<()> {
        let keys: Vec<ContactKey> = self.contacts.keys().collect();

        for key in keys {
            let action = {
                let Some(contact) = self.contacts.get_mut(key) else {
                    continue;
                };
                let (fa, fb) = (contact.fixture_a(), contact.fixture_b());
                match (bodies.get(fa.body), bodies.get(fb.body)) {
                    (Some(body_a), Some(body_b)) => {
                        match (body_a.fixtures().get(fa.fixture), body_b.fixtures().get(fb.fixture)) {
                            (Some(fixture_a), Some(fixture_b)) => {
                                let active = |b: &Rigidbody| b.is_awake() && !b.body_type().is_static();
                                if !self.broad_phase.test_overlap(fixture_a.proxy(), fixture_b.proxy()) {
                                    Action::Destroy
                                } else if !active(body_a) && !active(body_b) {
                                    Action::Skip
                                } else {
                                    contact.update(
                                        fixture_a.shape(),
                                        body_a.pose(),
                                        fixture_b.shape(),
                                        body_b.pose(),
                                        ctx,
                                        warm_starting,
                                    )?;
                                    Action::Update
                                }
                            }
                            _ => Action::Destroy,
                        }
                    }
                    _ => Action::Destroy,
                }
            };

            match action {
                Action::Destroy => self.destroy_contact(key, bodies),
                Action::Skip | Action::Update => {}
            }
        }
        Ok(())
    }

    /// Destroy a contact and unlink it from both bodies.
    pub fn destroy_contact(&mut self, key: ContactKey, bodies: &mut SlotMap<BodyHandle, Rigidbody>) {
        let Some(contact) = self.contacts.remove(key) else {
            return;
        };
        for handle in [contact.fixture_a().body, contact.fixture_b().body] {
            if let Some(body) = bodies.get_mut(handle) {
                body.remove_contact_link(key);
            }
        }
        debug!(?key, "contact destroyed");
    }

    /// Destroy every contact of a body and its broad phase proxies.
    pub(crate) fn destroy_body(
        &mut self,
        handle: BodyHandle,
        bodies: &mut SlotMap<BodyHandle, Rigidbody>,
    ) {
        let links: Vec<ContactKey> = bodies
            .get(handle)
            .map(|b| b.contact_links().iter().map(|l| l.contact).collect())
            .unwrap_or_default();
        for key in links {
            self.destroy_contact(key, bodies);
        }
        if let Some(body) = bodies.get_mut(handle) {
            body.destroy_proxies(&mut self.broad_phase);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::body::FixtureDef;
    use crate::contact::ContactFlags;
    use crate::shape::Shape;
    use nalgebra::{Point3, Vector3};
    use physics_types::BodyDef;

    struct Scene {
        bodies: SlotMap<BodyHandle, Rigidbody>,
        manager: ContactManager,
        ctx: PhysicsContext,
    }

    impl Scene {
        fn new() -> Self {
            Self {
                bodies: SlotMap::with_key(),
                manager: ContactManager::new(0.1),
                ctx: PhysicsContext::default(),
            }
        }

        fn add(&mut self, def: &BodyDef, shape: Shape) -> BodyHandle {
            let id = self.bodies.len();
            let handle = self.bodies.insert_with_key(|h| Rigidbody::new(id, h, def));
            self.bodies[handle]
                .create_fixture(FixtureDef::new(shape), self.manager.broad_phase_mut())
                .unwrap();
            handle
        }

        fn step(&mut self) {
            self.manager.find_new_contacts(&mut self.bodies);
            self.manager.collide(&mut self.bodies, &self.ctx, false).unwrap();
        }
    }

    fn unit_box() -> Shape {
        Shape::cuboid(Vector3::repeat(0.5))
    }

    #[test]
    fn test_contact_created_once() {
        let mut scene = Scene::new();
        let ground = scene.add(&BodyDef::static_body(), unit_box());
        let crate_ = scene.add(
            &BodyDef::dynamic().with_position(Point3::new(0.0, 0.98, 0.0)),
            unit_box(),
        );

        scene.step();
        assert_eq!(scene.manager.contact_count(), 1);
        let (key, contact) = scene.manager.contacts().next().unwrap();
        assert!(contact.is_touching());
        assert_eq!(scene.bodies[ground].contact_links().len(), 1);

        let contact = scene.manager.contact_mut(key).unwrap();
        contact.set_flags(ContactFlags::ISLAND, true);
        assert!(scene.manager.contact(key).unwrap().flags().contains(ContactFlags::ISLAND));
        assert_eq!(scene.bodies[crate_].contact_links()[0].other, ground);

        // Re-buffering the proxies does not duplicate the contact.
        let proxy = scene.bodies[crate_].fixtures()[0].proxy();
        scene.manager.broad_phase_mut().buffer_move(proxy);
        scene.step();
        assert_eq!(scene.manager.contact_count(), 1);
    }

    #[test]
    fn test_static_pairs_are_ignored() {
        let mut scene = Scene::new();
        scene.add(&BodyDef::static_body(), unit_box());
        scene.add(
            &BodyDef::static_body().with_position(Point3::new(0.5, 0.0, 0.0)),
            unit_box(),
        );
        scene.step();
        assert_eq!(scene.manager.contact_count(), 0);
    }

    #[test]
    fn test_contact_destroyed_when_apart() {
        let mut scene = Scene::new();
        let ground = scene.add(&BodyDef::static_body(), unit_box());
        let ball = scene.add(
            &BodyDef::dynamic().with_position(Point3::new(0.0, 1.05, 0.0)),
            Shape::sphere(0.5),
        );
        scene.step();
        assert_eq!(scene.manager.contact_count(), 1);

        scene.bodies[ball].set_position(Point3::new(0.0, 5.0, 0.0));
        let body = &mut scene.bodies[ball];
        body.synchronize_fixtures(scene.manager.broad_phase_mut());
        scene.step();

        assert_eq!(scene.manager.contact_count(), 0);
        assert!(scene.bodies[ground].contact_links().is_empty());
        assert!(scene.bodies[ball].contact_links().is_empty());
    }

    #[test]
    fn test_destroy_body_unlinks() {
        let mut scene = Scene::new();
        let ground = scene.add(&BodyDef::static_body(), unit_box());
        let crate_ = scene.add(
            &BodyDef::dynamic().with_position(Point3::new(0.0, 0.98, 0.0)),
            unit_box(),
        );
        scene.step();

        scene.manager.destroy_body(crate_, &mut scene.bodies);
        scene.bodies.remove(crate_);
        assert_eq!(scene.manager.contact_count(), 0);
        assert!(scene.bodies[ground].contact_links().is_empty());
        assert_eq!(scene.manager.broad_phase().proxy_count(), 1);
    }
}
