use crate::{
    index::{ApplyChanges, CacheIndex, IndexError, apply_batch},
    types::{Change, Keyed},
};
use std::{cmp::Ordering, collections::HashMap, fmt::Debug, hash::Hash, rc::Rc};

///
/// SortedGroupIndex
///
/// Grouping whose members are kept in comparator order within each group.
/// Members are cached as shared instances, so reads never touch the store
/// and positioning during a mutation compares against the cached values
/// directly. The comparator must be consistent with identity within a group;
/// a distinct record comparing equal to an existing member is rejected as an
/// [`IndexError::OrderConflict`]. Groups with no members are dropped.
///

pub struct SortedGroupIndex<G, R: Keyed> {
    group_fn: Box<dyn Fn(&R) -> Option<G>>,
    comparator: Box<dyn Fn(&R, &R) -> Ordering>,
    groups: HashMap<G, Vec<Rc<R>>>,
}

impl<G, R> SortedGroupIndex<G, R>
where
    G: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    pub(crate) fn new(
        group_fn: impl Fn(&R) -> Option<G> + 'static,
        comparator: impl Fn(&R, &R) -> Ordering + 'static,
    ) -> Self {
        Self {
            group_fn: Box::new(group_fn),
            comparator: Box::new(comparator),
            groups: HashMap::new(),
        }
    }

    /// Members of `group` in comparator order.
    #[must_use]
    pub fn get(&self, group: &G) -> Vec<Rc<R>> {
        self.groups.get(group).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn first(&self, group: &G) -> Option<Rc<R>> {
        self.groups.get(group)?.first().cloned()
    }

    #[must_use]
    pub fn last(&self, group: &G) -> Option<Rc<R>> {
        self.groups.get(group)?.last().cloned()
    }

    #[must_use]
    pub fn count(&self, group: &G) -> usize {
        self.groups.get(group).map_or(0, Vec::len)
    }

    pub fn groups(&self) -> impl Iterator<Item = &G> {
        self.groups.keys()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

impl<G, R> CacheIndex<R> for SortedGroupIndex<G, R>
where
    G: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn insert(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let Some(group) = (self.group_fn)(record) else {
            return Ok(());
        };

        let members = self.groups.entry(group).or_default();
        match members.binary_search_by(|probe| (self.comparator)(probe, record)) {
            Ok(pos) => {
                let existing = &members[pos];
                if existing.id() == record.id() {
                    // Same identity; refresh the cached instance.
                    members[pos] = record.clone();
                    Ok(())
                } else {
                    let existing = existing.id().value();
                    Err(IndexError::OrderConflict {
                        incoming: record.id().value(),
                        existing,
                    })
                }
            }
            Err(pos) => {
                members.insert(pos, record.clone());
                Ok(())
            }
        }
    }

    fn remove(&mut self, record: &Rc<R>) -> Result<(), IndexError> {
        let Some(group) = (self.group_fn)(record) else {
            return Ok(());
        };

        let Some(members) = self.groups.get_mut(&group) else {
            return Err(IndexError::MissingEntry {
                id: record.id().value(),
            });
        };

        match members.binary_search_by(|probe| (self.comparator)(probe, record)) {
            Ok(pos) if members[pos].id() == record.id() => {
                members.remove(pos);
                if members.is_empty() {
                    self.groups.remove(&group);
                }
                Ok(())
            }
            _ => Err(IndexError::MissingEntry {
                id: record.id().value(),
            }),
        }
    }
}

impl<G, R> ApplyChanges<R> for SortedGroupIndex<G, R>
where
    G: Clone + Eq + Hash + Debug + 'static,
    R: Keyed + 'static,
{
    fn apply(&mut self, changes: &[Change<R>]) -> Result<(), IndexError> {
        apply_batch(self, changes)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Id;

    #[derive(Debug)]
    struct Player {
        id: u64,
        team: Option<&'static str>,
        score: u32,
    }

    impl Keyed for Player {
        fn id(&self) -> Id<Self> {
            Id::new(self.id)
        }
    }

    fn player(id: u64, team: Option<&'static str>, score: u32) -> Rc<Player> {
        Rc::new(Player { id, team, score })
    }

    fn team_of(player: &Player) -> Option<&'static str> {
        player.team
    }

    fn by_score(a: &Player, b: &Player) -> Ordering {
        a.score.cmp(&b.score).then(a.id.cmp(&b.id))
    }

    fn index() -> SortedGroupIndex<&'static str, Player> {
        SortedGroupIndex::new(team_of, by_score)
    }

    #[test]
    fn members_are_ordered_within_each_group() {
        let mut index = index();
        index
            .apply(&[
                Change::add(player(1, Some("red"), 30)),
                Change::add(player(2, Some("red"), 10)),
                Change::add(player(3, Some("blue"), 20)),
                Change::add(player(4, Some("red"), 20)),
            ])
            .unwrap();

        let scores: Vec<u32> = index.get(&"red").iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![10, 20, 30]);
        assert_eq!(index.first(&"red").unwrap().score, 10);
        assert_eq!(index.last(&"red").unwrap().score, 30);
        assert_eq!(index.count(&"blue"), 1);
        assert_eq!(index.group_count(), 2);
    }

    #[test]
    fn ungrouped_records_are_ignored() {
        let mut index = index();
        let free_agent = player(1, None, 50);
        index.apply(&[Change::add(free_agent.clone())]).unwrap();
        assert_eq!(index.group_count(), 0);

        index.apply(&[Change::delete(free_agent)]).unwrap();
    }

    #[test]
    fn empty_groups_are_dropped() {
        let mut index = index();
        let only = player(1, Some("red"), 10);
        index.apply(&[Change::add(only.clone())]).unwrap();

        index.apply(&[Change::delete(only)]).unwrap();
        assert_eq!(index.group_count(), 0);
        assert!(index.first(&"red").is_none());
    }

    #[test]
    fn update_repositions_within_the_group() {
        let mut index = index();
        let before = player(1, Some("red"), 10);
        let peer = player(2, Some("red"), 20);
        index
            .apply(&[Change::add(before.clone()), Change::add(peer)])
            .unwrap();

        let after = player(1, Some("red"), 30);
        index
            .apply(&[Change::update(before, after).unwrap()])
            .unwrap();

        let scores: Vec<u32> = index.get(&"red").iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![20, 30]);
    }

    #[test]
    fn update_moves_between_groups() {
        let mut index = index();
        let before = player(1, Some("red"), 10);
        index.apply(&[Change::add(before.clone())]).unwrap();

        let after = player(1, Some("blue"), 10);
        index
            .apply(&[Change::update(before, after).unwrap()])
            .unwrap();

        assert_eq!(index.count(&"red"), 0);
        assert_eq!(index.count(&"blue"), 1);
    }

    #[test]
    fn comparator_collision_is_rejected_and_rolled_back() {
        // Comparator ignores identity: equal scores compare equal.
        let mut index: SortedGroupIndex<&'static str, Player> =
            SortedGroupIndex::new(team_of, |a, b| a.score.cmp(&b.score));

        index
            .apply(&[Change::add(player(1, Some("red"), 10))])
            .unwrap();

        let err = index
            .apply(&[
                Change::add(player(2, Some("red"), 5)),
                Change::add(player(3, Some("red"), 10)),
            ])
            .unwrap_err();
        assert!(matches!(err, IndexError::OrderConflict { .. }));

        // The batch rolled back: the earlier add of player 2 was undone.
        assert_eq!(index.count(&"red"), 1);
    }
}
