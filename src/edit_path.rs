//! Minimum edit paths between two sequences.
//!
//! A Levenshtein-style dynamic programme over arbitrary element types, with
//! the substitution cost supplied by an [`EditComparator`]. The merger uses
//! it to align annotation lists; [`levenshtein`] covers plain strings.
//!
//! On equal totals a deletion is preferred over an insertion, and an
//! insertion over a substitution. [`collapse_ties`] turns such ties back
//! into substitutions where that matters.

/// What a step in an edit path does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOperation {
    /// The elements correspond unchanged.
    None,
    /// The elements correspond, with a change.
    Change,
    /// The `to` element has no counterpart.
    Insert,
    /// The `from` element has no counterpart.
    Delete,
}

/// One step of an edit path, by index into the input sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditStep {
    /// Operation.
    pub operation: EditOperation,
    /// Index into the `from` sequence (absent for inserts).
    pub from: Option<usize>,
    /// Index into the `to` sequence (absent for deletes).
    pub to: Option<usize>,
    /// Cost of this step alone.
    pub distance: u32,
}

impl EditStep {
    /// Whether the step pairs two elements.
    pub fn is_pairing(&self) -> bool {
        self.from.is_some() && self.to.is_some()
    }
}

/// Costs of edit operations.
pub trait EditComparator<A, B> {
    /// Cost of pairing `from` with `to`, and whether the pairing counts as a
    /// change.
    fn compare(&mut self, from: &A, to: &B) -> (u32, EditOperation);

    /// Cost of dropping `from`.
    fn delete(&mut self, _from: &A) -> u32 {
        1
    }

    /// Cost of adding `to`.
    fn insert(&mut self, _to: &B) -> u32 {
        1
    }
}

/// Fixed costs over equatable elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformCosts {
    /// Insertion cost.
    pub insert: u32,
    /// Deletion cost.
    pub delete: u32,
    /// Substitution cost.
    pub change: u32,
}

impl Default for UniformCosts {
    fn default() -> Self {
        Self {
            insert: 1,
            delete: 1,
            change: 1,
        }
    }
}

impl<T: PartialEq> EditComparator<T, T> for UniformCosts {
    fn compare(&mut self, from: &T, to: &T) -> (u32, EditOperation) {
        if from == to {
            (0, EditOperation::None)
        } else {
            (self.change, EditOperation::Change)
        }
    }

    fn delete(&mut self, _from: &T) -> u32 {
        self.delete
    }

    fn insert(&mut self, _to: &T) -> u32 {
        self.insert
    }
}

#[derive(Clone, Copy)]
enum Back {
    Start,
    Diagonal,
    Left,
    Up,
}

#[derive(Clone, Copy)]
struct Cell {
    total: u64,
    step: u32,
    operation: EditOperation,
    back: Back,
}

/// Cheapest sequence of steps turning `from` into `to`.
pub fn minimum_edit_path<A, B, C>(from: &[A], to: &[B], comparator: &mut C) -> Vec<EditStep>
where
    C: EditComparator<A, B> + ?Sized,
{
    let width = to.len() + 1;
    let start = Cell {
        total: 0,
        step: 0,
        operation: EditOperation::None,
        back: Back::Start,
    };
    let mut cells = vec![start; (from.len() + 1) * width];
    for (j, t) in to.iter().enumerate() {
        let step = comparator.insert(t);
        cells[j + 1] = Cell {
            total: cells[j].total + u64::from(step),
            step,
            operation: EditOperation::Insert,
            back: Back::Up,
        };
    }
    for (i, f) in from.iter().enumerate() {
        let row = (i + 1) * width;
        let above = i * width;
        let step = comparator.delete(f);
        cells[row] = Cell {
            total: cells[above].total + u64::from(step),
            step,
            operation: EditOperation::Delete,
            back: Back::Left,
        };
        for (j, t) in to.iter().enumerate() {
            let (change, operation) = comparator.compare(f, t);
            let mut winner = Cell {
                total: cells[above + j].total + u64::from(change),
                step: change,
                operation,
                back: Back::Diagonal,
            };
            let insert = comparator.insert(t);
            let insert_total = cells[row + j].total + u64::from(insert);
            if winner.total >= insert_total {
                winner = Cell {
                    total: insert_total,
                    step: insert,
                    operation: EditOperation::Insert,
                    back: Back::Up,
                };
            }
            let delete = comparator.delete(f);
            let delete_total = cells[above + j + 1].total + u64::from(delete);
            if winner.total >= delete_total {
                winner = Cell {
                    total: delete_total,
                    step: delete,
                    operation: EditOperation::Delete,
                    back: Back::Left,
                };
            }
            cells[row + j + 1] = winner;
        }
    }

    let mut path = Vec::with_capacity(from.len().max(to.len()));
    let (mut i, mut j) = (from.len(), to.len());
    loop {
        let cell = cells[i * width + j];
        match cell.back {
            Back::Start => break,
            Back::Diagonal => {
                path.push(EditStep {
                    operation: cell.operation,
                    from: Some(i - 1),
                    to: Some(j - 1),
                    distance: cell.step,
                });
                i -= 1;
                j -= 1;
            }
            Back::Left => {
                path.push(EditStep {
                    operation: EditOperation::Delete,
                    from: Some(i - 1),
                    to: None,
                    distance: cell.step,
                });
                i -= 1;
            }
            Back::Up => {
                path.push(EditStep {
                    operation: EditOperation::Insert,
                    from: None,
                    to: Some(j - 1),
                    distance: cell.step,
                });
                j -= 1;
            }
        }
    }
    path.reverse();
    path
}

/// Total cost of a path.
pub fn path_distance(path: &[EditStep]) -> u64 {
    path.iter().map(|s| u64::from(s.distance)).sum()
}

/// Merge adjacent delete/insert pairs into changes when pairing the two
/// elements costs no more than three times dropping and adding them.
///
/// Used where elements should resist being deleted and recreated.
pub fn collapse<A, B, C>(path: Vec<EditStep>, from: &[A], to: &[B], comparator: &mut C) -> Vec<EditStep>
where
    C: EditComparator<A, B> + ?Sized,
{
    collapse_within(path, from, to, comparator, 3)
}

/// Merge adjacent delete/insert pairs into changes when pairing the two
/// elements costs no more than dropping and adding them.
///
/// The path's total is unchanged; only ties are resolved in favour of the
/// pairing.
pub fn collapse_ties<A, B, C>(path: Vec<EditStep>, from: &[A], to: &[B], comparator: &mut C) -> Vec<EditStep>
where
    C: EditComparator<A, B> + ?Sized,
{
    collapse_within(path, from, to, comparator, 1)
}

fn collapse_within<A, B, C>(path: Vec<EditStep>, from: &[A], to: &[B], comparator: &mut C, factor: u32) -> Vec<EditStep>
where
    C: EditComparator<A, B> + ?Sized,
{
    let mut collapsed: Vec<EditStep> = Vec::with_capacity(path.len());
    for step in path {
        let merged = match collapsed.last() {
            Some(last) => {
                let pair = match (last.operation, step.operation) {
                    (EditOperation::Delete, EditOperation::Insert) => last.from.zip(step.to),
                    (EditOperation::Insert, EditOperation::Delete) => step.from.zip(last.to),
                    _ => None,
                };
                pair.and_then(|(f, t)| {
                    let (change, operation) = comparator.compare(&from[f], &to[t]);
                    let separate = last.distance + step.distance;
                    (change <= factor.saturating_mul(separate)).then_some(EditStep {
                        operation: if operation == EditOperation::None {
                            EditOperation::Change
                        } else {
                            operation
                        },
                        from: Some(f),
                        to: Some(t),
                        distance: if factor == 1 { change } else { separate },
                    })
                })
            }
            None => None,
        };
        match merged {
            Some(change) => {
                collapsed.pop();
                collapsed.push(change);
            }
            None => collapsed.push(step),
        }
    }
    collapsed
}

/// Levenshtein distance between two strings, by character, with the given
/// costs.
pub fn levenshtein_with(a: &str, b: &str, costs: UniformCosts) -> u64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut costs = costs;
    path_distance(&minimum_edit_path(&a, &b, &mut costs))
}

/// Levenshtein distance with unit costs.
pub fn levenshtein(a: &str, b: &str) -> u64 {
    levenshtein_with(a, b, UniformCosts::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_expensive_substitution() {
        let costs = UniformCosts {
            insert: 1,
            delete: 1,
            change: 2,
        };
        assert_eq!(levenshtein_with("a", "b", costs), 2);
        assert_eq!(levenshtein_with("ab", "ba", costs), 2);
    }

    #[test]
    fn test_path_indices() {
        let from = ['a', 'b', 'c'];
        let to = ['a', 'c', 'd'];
        let path = minimum_edit_path(&from, &to, &mut UniformCosts::default());
        let pairs: Vec<(Option<usize>, Option<usize>)> = path.iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(pairs, vec![(Some(0), Some(0)), (Some(1), None), (Some(2), Some(1)), (None, Some(2))]);
        assert_eq!(path_distance(&path), 2);
    }

    #[test]
    fn test_empty_inputs() {
        let none: [char; 0] = [];
        assert!(minimum_edit_path(&none, &none, &mut UniformCosts::default()).is_empty());
        let path = minimum_edit_path(&['x'], &none, &mut UniformCosts::default());
        assert_eq!(path[0].operation, EditOperation::Delete);
    }

    #[test]
    fn test_collapse_pairs_delete_insert() {
        let mut costs = UniformCosts {
            insert: 1,
            delete: 1,
            change: 5,
        };
        let from = ['a'];
        let to = ['b'];
        let path = minimum_edit_path(&from, &to, &mut costs);
        assert_eq!(path.len(), 2);
        let collapsed = collapse(path, &from, &to, &mut costs);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].operation, EditOperation::Change);
        assert_eq!((collapsed[0].from, collapsed[0].to), (Some(0), Some(0)));
    }

    #[test]
    fn test_collapse_ties_keeps_equal_cost_pairings() {
        let mut costs = UniformCosts {
            insert: 1,
            delete: 1,
            change: 2,
        };
        let from = ['x', 'a'];
        let to = ['y', 'a'];
        let path = minimum_edit_path(&from, &to, &mut costs);
        assert_eq!(path.len(), 3);
        let collapsed = collapse_ties(path, &from, &to, &mut costs);
        let pairs: Vec<(Option<usize>, Option<usize>)> = collapsed.iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(pairs, vec![(Some(0), Some(0)), (Some(1), Some(1))]);
        assert_eq!(collapsed[0].operation, EditOperation::Change);
        assert_eq!(path_distance(&collapsed), 2);

        // a dearer substitution stays a delete and an insert
        costs.change = 3;
        let path = minimum_edit_path(&from, &to, &mut costs);
        assert_eq!(collapse_ties(path, &from, &to, &mut costs).len(), 3);
    }
}
