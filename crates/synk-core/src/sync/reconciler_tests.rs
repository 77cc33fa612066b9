//! Tests for reconciler module.

#[cfg(test)]
mod tests {
    use super::super::detector::{detect, ChangeKind, DetectedChange, ProviderDelta};
    use super::super::reconciler::*;
    use crate::error::SyncError;
    use crate::model::{
        ItemStatus, LinkChange, LinkEnd, LinkRecord, PendingLink, Provider, Snapshot, SyncItem,
        SyncOperation,
    };
    use crate::providers::ChangeListing;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::{BTreeMap, HashMap};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 6, h, 0, 0).unwrap()
    }

    fn item(provider: Provider, id: &str, title: &str, modified: u32) -> SyncItem {
        SyncItem::new(provider, id, title, at(9), Some(at(10)), ItemStatus::Active, at(modified))
    }

    fn link(notion: &SyncItem, google: &SyncItem) -> LinkRecord {
        let notion_id = notion.id_for(Provider::Notion).unwrap();
        LinkRecord {
            link_id: LinkRecord::origin_key(Provider::Notion, notion_id),
            notion_id: notion_id.to_string(),
            google_id: google.id_for(Provider::Google).unwrap().to_string(),
            notion_hash: notion.content_hash.clone(),
            google_hash: google.content_hash.clone(),
            last_synced_at: at(1),
        }
    }

    fn full(items: Vec<SyncItem>) -> ChangeListing {
        ChangeListing {
            items,
            full_scan: true,
            ..Default::default()
        }
    }

    /// In-memory stand-in for both providers plus the link table.
    #[derive(Default)]
    struct World {
        notion: BTreeMap<String, SyncItem>,
        google: BTreeMap<String, SyncItem>,
        links: Vec<LinkRecord>,
        next_id: usize,
    }

    impl World {
        fn put(&mut self, provider: Provider, item: SyncItem) {
            let id = item.id_for(provider).unwrap().to_string();
            self.side(provider).insert(id, item);
        }

        fn side(&mut self, provider: Provider) -> &mut BTreeMap<String, SyncItem> {
            match provider {
                Provider::Notion => &mut self.notion,
                Provider::Google => &mut self.google,
            }
        }

        fn deltas(&self) -> (ProviderDelta, ProviderDelta) {
            let notion = detect(
                Provider::Notion,
                &Snapshot::empty(Provider::Notion),
                &full(self.notion.values().cloned().collect()),
                &self.links,
            );
            let google = detect(
                Provider::Google,
                &Snapshot::empty(Provider::Google),
                &full(self.google.values().cloned().collect()),
                &self.links,
            );
            (notion, google)
        }

        fn plan(&self) -> Vec<SyncOperation> {
            let (notion, google) = self.deltas();
            reconcile(&notion, &google, &self.links).unwrap()
        }

        fn upsert(&mut self, pending: &PendingLink, created: &HashMap<usize, String>) {
            let record = pending.resolve(created, at(20)).unwrap();
            self.links.retain(|l| l.link_id != record.link_id);
            self.links.push(record);
        }

        fn apply(&mut self, ops: &[SyncOperation]) {
            let mut created = HashMap::new();
            for (index, op) in ops.iter().enumerate() {
                match op {
                    SyncOperation::Create { provider, item } => {
                        self.next_id += 1;
                        let id = format!("{}-new-{}", provider.as_str(), self.next_id);
                        let mut stored = item.clone();
                        stored.set_id(*provider, Some(id.clone()));
                        stored.last_modified = at(20);
                        self.side(*provider).insert(id.clone(), stored);
                        created.insert(index, id);
                    }
                    SyncOperation::Update {
                        provider,
                        id,
                        patch,
                        link,
                    } => {
                        let stored = self.side(*provider).get_mut(id).unwrap();
                        patch.apply_to(stored);
                        stored.last_modified = at(20);
                        self.upsert(link, &created);
                    }
                    SyncOperation::Delete {
                        provider,
                        id,
                        link_id,
                    } => {
                        self.side(*provider).remove(id);
                        self.links.retain(|l| &l.link_id != link_id);
                    }
                    SyncOperation::LinkOnly(LinkChange::Establish(pending)) => {
                        self.upsert(pending, &created);
                    }
                    SyncOperation::LinkOnly(LinkChange::Dissolve { link_id }) => {
                        self.links.retain(|l| &l.link_id != link_id);
                    }
                }
            }
        }
    }

    fn linked_pair(world: &mut World, n: &str, g: &str, title: &str) -> (SyncItem, SyncItem) {
        let notion = item(Provider::Notion, n, title, 2);
        let google = item(Provider::Google, g, title, 2);
        world.links.push(link(&notion, &google));
        (notion, google)
    }

    #[test]
    fn new_notion_item_is_created_then_linked() {
        let mut world = World::default();
        let milk = item(Provider::Notion, "n1", "Buy milk", 1);
        world.put(Provider::Notion, milk.clone());

        let ops = world.plan();
        assert_eq!(
            ops,
            vec![
                SyncOperation::Create {
                    provider: Provider::Google,
                    item: milk.for_target(Provider::Google),
                },
                SyncOperation::LinkOnly(LinkChange::Establish(PendingLink {
                    link_id: "notion:n1".into(),
                    notion: LinkEnd::Known("n1".into()),
                    google: LinkEnd::CreatedBy(0),
                    notion_hash: milk.content_hash.clone(),
                    google_hash: milk.content_hash.clone(),
                })),
            ]
        );

        world.apply(&ops);
        assert_eq!(world.links.len(), 1);
        assert_eq!(world.links[0].notion_id, "n1");
        assert_eq!(world.links[0].google_id, "google-new-1");
        assert!(world.plan().is_empty());
    }

    #[test]
    fn later_google_edit_wins() {
        let mut world = World::default();
        linked_pair(&mut world, "n1", "g1", "Standup");
        world.put(Provider::Notion, item(Provider::Notion, "n1", "Standup (notion)", 3));
        world.put(Provider::Google, item(Provider::Google, "g1", "Standup (google)", 4));

        let ops = world.plan();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            SyncOperation::Update {
                provider, id, patch, ..
            } => {
                assert_eq!(*provider, Provider::Notion);
                assert_eq!(id, "n1");
                assert_eq!(patch.title.as_deref(), Some("Standup (google)"));
                assert!(patch.timing.is_none());
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn later_notion_edit_wins() {
        let mut world = World::default();
        linked_pair(&mut world, "n1", "g1", "Review");
        world.put(Provider::Notion, item(Provider::Notion, "n1", "Review v2", 7));
        world.put(Provider::Google, item(Provider::Google, "g1", "Review v3", 5));

        let ops = world.plan();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].target(), Some(Provider::Google));
    }

    #[test]
    fn simultaneous_edits_resolve_toward_google() {
        let mut world = World::default();
        linked_pair(&mut world, "n1", "g1", "Lunch");
        world.put(Provider::Notion, item(Provider::Notion, "n1", "Lunch at noon", 5));
        world.put(Provider::Google, item(Provider::Google, "g1", "Lunch at one", 5));

        let ops = world.plan();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].target(), Some(Provider::Notion));
    }

    #[test]
    fn identical_edits_only_refresh_the_link() {
        let mut world = World::default();
        linked_pair(&mut world, "n1", "g1", "Gym");
        let notion = item(Provider::Notion, "n1", "Gym (legs)", 5);
        world.put(Provider::Notion, notion.clone());
        world.put(Provider::Google, item(Provider::Google, "g1", "Gym (legs)", 6));

        let ops = world.plan();
        assert_eq!(
            ops,
            vec![SyncOperation::LinkOnly(LinkChange::Establish(PendingLink::known(
                "notion:n1",
                "n1",
                "g1",
                notion.content_hash.clone(),
                notion.content_hash.clone(),
            )))]
        );
    }

    #[test]
    fn google_deletion_deletes_notion_item() {
        let mut world = World::default();
        let (notion, _) = linked_pair(&mut world, "n1", "g1", "Call mom");
        world.put(Provider::Notion, notion);

        let ops = world.plan();
        assert_eq!(
            ops,
            vec![SyncOperation::Delete {
                provider: Provider::Notion,
                id: "n1".into(),
                link_id: "notion:n1".into(),
            }]
        );

        world.apply(&ops);
        assert!(world.links.is_empty());
        assert!(world.notion.is_empty());
    }

    #[test]
    fn deletion_beats_concurrent_edit() {
        let mut world = World::default();
        linked_pair(&mut world, "n1", "g1", "Plan trip");
        world.put(Provider::Google, item(Provider::Google, "g1", "Plan trip to Oslo", 9));

        let ops = world.plan();
        assert_eq!(
            ops,
            vec![SyncOperation::Delete {
                provider: Provider::Google,
                id: "g1".into(),
                link_id: "notion:n1".into(),
            }]
        );
    }

    #[test]
    fn removal_on_both_sides_dissolves_link() {
        let mut world = World::default();
        linked_pair(&mut world, "n1", "g1", "Old task");

        let ops = world.plan();
        assert_eq!(
            ops,
            vec![SyncOperation::LinkOnly(LinkChange::Dissolve {
                link_id: "notion:n1".into()
            })]
        );
    }

    #[test]
    fn counterpart_left_by_lost_link_is_recovered_not_duplicated() {
        let mut world = World::default();
        let notion = item(Provider::Notion, "n1", "Buy milk", 2);
        world.put(Provider::Notion, notion.clone());
        // Created on Google last cycle, but the link commit never happened.
        world.put(
            Provider::Google,
            item(Provider::Google, "g9", "Buy milk", 3).with_counterpart(Provider::Notion, "n1"),
        );

        let ops = world.plan();
        assert_eq!(
            ops,
            vec![SyncOperation::LinkOnly(LinkChange::Establish(PendingLink::known(
                "notion:n1",
                "n1",
                "g9",
                notion.content_hash.clone(),
                notion.content_hash.clone(),
            )))]
        );
    }

    #[test]
    fn recovered_pair_with_diverged_content_is_updated() {
        let mut world = World::default();
        world.put(Provider::Notion, item(Provider::Notion, "n1", "Buy oat milk", 8));
        world.put(
            Provider::Google,
            item(Provider::Google, "g9", "Buy milk", 3).with_counterpart(Provider::Notion, "n1"),
        );

        let ops = world.plan();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            SyncOperation::Update { provider, id, .. } => {
                assert_eq!(*provider, Provider::Google);
                assert_eq!(id, "g9");
            }
            other => panic!("expected update, got {other:?}"),
        }
        world.apply(&ops);
        assert!(world.plan().is_empty());
    }

    #[test]
    fn duplicate_link_ids_are_rejected() {
        let notion = item(Provider::Notion, "n1", "A", 1);
        let google = item(Provider::Google, "g1", "A", 1);
        let mut second = link(&notion, &google);
        second.notion_id = "n2".into();
        second.google_id = "g2".into();
        let links = vec![link(&notion, &google), second];

        let empty_notion = detect(Provider::Notion, &Snapshot::empty(Provider::Notion), &full(vec![notion]), &[]);
        let empty_google = detect(Provider::Google, &Snapshot::empty(Provider::Google), &full(vec![google]), &[]);
        let err = reconcile(&empty_notion, &empty_google, &links).unwrap_err();
        assert!(matches!(err, SyncError::InvariantViolation(_)));
    }

    #[test]
    fn linked_item_classified_as_added_is_rejected() {
        let notion = item(Provider::Notion, "n1", "A", 1);
        let google = item(Provider::Google, "g1", "A", 1);
        let links = vec![link(&notion, &google)];
        let notion_delta = ProviderDelta {
            provider: Provider::Notion,
            changes: vec![DetectedChange {
                kind: ChangeKind::Added,
                id: "n1".into(),
                item: Some(notion.clone()),
                last_modified: notion.last_modified,
            }],
            view: Snapshot::from_items(Provider::Notion, [notion]),
        };
        let google_delta = detect(Provider::Google, &Snapshot::empty(Provider::Google), &full(vec![google]), &links);

        let err = reconcile(&notion_delta, &google_delta, &links).unwrap_err();
        assert!(matches!(err, SyncError::InvariantViolation(_)));
    }

    #[test]
    fn mixed_cycle_converges_in_one_pass() {
        let mut world = World::default();
        world.put(Provider::Notion, item(Provider::Notion, "n1", "Buy milk", 1));
        world.put(Provider::Google, item(Provider::Google, "g1", "Dentist", 1));

        let (_, g2) = linked_pair(&mut world, "n2", "g2", "Write report");
        world.put(Provider::Notion, item(Provider::Notion, "n2", "Write final report", 4));
        world.put(Provider::Google, g2);

        let (n3, _) = linked_pair(&mut world, "n3", "g3", "Pay rent");
        world.put(Provider::Notion, n3);

        linked_pair(&mut world, "n4", "g4", "Retro");
        world.put(Provider::Notion, item(Provider::Notion, "n4", "Retro (notion)", 4));
        world.put(Provider::Google, item(Provider::Google, "g4", "Retro (google)", 6));

        linked_pair(&mut world, "n5", "g5", "Gone everywhere");

        let (n6, g6) = linked_pair(&mut world, "n6", "g6", "Quiet");
        world.put(Provider::Notion, n6);
        world.put(Provider::Google, g6);

        let ops = world.plan();
        // 2 creates + 2 links, 2 updates, 1 delete, 1 dissolve.
        assert_eq!(ops.len(), 8);
        world.apply(&ops);

        assert!(world.plan().is_empty());
        assert_eq!(world.links.len(), 5);
        assert_eq!(world.notion.len(), 5);
        assert_eq!(world.google.len(), 5);
        assert_eq!(world.notion["n4"].title, "Retro (google)");
        assert_eq!(world.google["g2"].title, "Write final report");
    }

    /// Build a world from scenario codes; each index gets its own ids.
    fn scenario(codes: &[u8]) -> World {
        let mut world = World::default();
        for (i, code) in codes.iter().enumerate() {
            let n = format!("n{i}");
            let g = format!("g{i}");
            let hour = (i % 12) as u32 + 2;
            match code {
                0 => world.put(Provider::Notion, item(Provider::Notion, &n, "notion only", hour)),
                1 => world.put(Provider::Google, item(Provider::Google, &g, "google only", hour)),
                2 => {
                    let (ni, gi) = linked_pair(&mut world, &n, &g, "steady");
                    world.put(Provider::Notion, ni);
                    world.put(Provider::Google, gi);
                }
                3 => {
                    let (_, gi) = linked_pair(&mut world, &n, &g, "before");
                    world.put(Provider::Notion, item(Provider::Notion, &n, "after", hour));
                    world.put(Provider::Google, gi);
                }
                4 => {
                    let (ni, _) = linked_pair(&mut world, &n, &g, "doomed");
                    world.put(Provider::Notion, ni);
                }
                _ => {
                    linked_pair(&mut world, &n, &g, "contested");
                    world.put(Provider::Notion, item(Provider::Notion, &n, "mine", hour));
                    world.put(Provider::Google, item(Provider::Google, &g, "theirs", 14 - hour % 12));
                }
            }
        }
        world
    }

    fn permuted<T: Clone>(values: &[T], order: &[usize]) -> Vec<T> {
        order
            .iter()
            .filter(|&&i| i < values.len())
            .map(|&i| values[i].clone())
            .collect()
    }

    fn arb_case() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
        prop::collection::vec(0u8..6, 1..16).prop_flat_map(|codes| {
            let n = codes.len();
            (Just(codes), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        })
    }

    proptest! {
        #[test]
        fn output_ignores_input_order((codes, order) in arb_case()) {
            let world = scenario(&codes);
            let (notion, google) = world.deltas();
            let expected = reconcile(&notion, &google, &world.links).unwrap();

            let shuffled_notion = ProviderDelta {
                changes: permuted(&notion.changes, &order),
                ..notion.clone()
            };
            let mut reversed = google.changes.clone();
            reversed.reverse();
            let shuffled_google = ProviderDelta { changes: reversed, ..google.clone() };
            let shuffled_links = permuted(&world.links, &order);

            let actual = reconcile(&shuffled_notion, &shuffled_google, &shuffled_links).unwrap();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn applying_the_plan_reaches_a_fixed_point(codes in prop::collection::vec(0u8..6, 1..16)) {
            let mut world = scenario(&codes);
            let ops = world.plan();
            world.apply(&ops);
            prop_assert!(world.plan().is_empty());
        }
    }
}
