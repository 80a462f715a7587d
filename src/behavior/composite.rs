//! Composite Nodes
//!
//! Both composites remember which child they were on. A child reporting
//! `Running` freezes the cursor there, so the next tick resumes at that child
//! instead of re-running the ones before it.

use crate::behavior::node::{BoxedNode, Node, Status};

/// Runs children in order until one does not succeed.
pub struct Sequence<C> {
    children: Vec<BoxedNode<C>>,
    cursor: usize,
}

impl<C> Sequence<C> {
    /// Sequence over `children`.
    pub fn new(children: Vec<BoxedNode<C>>) -> Self {
        Self { children, cursor: 0 }
    }

    /// Index of the child the next tick starts from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl<C: Send> Node<C> for Sequence<C> {
    fn tick(&mut self, ctx: &mut C) -> Status {
        while let Some(child) = self.children.get_mut(self.cursor) {
            match child.tick(ctx) {
                Status::Running => return Status::Running,
                Status::Failure => {
                    self.cursor = 0;
                    return Status::Failure;
                }
                Status::Success => self.cursor += 1,
            }
        }
        self.cursor = 0;
        Status::Success
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.children.iter_mut().for_each(|c| c.reset());
    }
}

/// Tries children in order until one does not fail.
pub struct Fallback<C> {
    children: Vec<BoxedNode<C>>,
    cursor: usize,
}

impl<C> Fallback<C> {
    /// Fallback over `children`.
    pub fn new(children: Vec<BoxedNode<C>>) -> Self {
        Self { children, cursor: 0 }
    }

    /// Index of the child the next tick starts from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl<C: Send> Node<C> for Fallback<C> {
    fn tick(&mut self, ctx: &mut C) -> Status {
        while let Some(child) = self.children.get_mut(self.cursor) {
            match child.tick(ctx) {
                Status::Running => return Status::Running,
                Status::Success => {
                    self.cursor = 0;
                    return Status::Success;
                }
                Status::Failure => self.cursor += 1,
            }
        }
        self.cursor = 0;
        Status::Failure
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.children.iter_mut().for_each(|c| c.reset());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::leaf::Condition;

    /// Returns scripted statuses and counts its ticks in the context.
    struct Script {
        statuses: Vec<Status>,
        slot: usize,
    }

    impl Node<Vec<usize>> for Script {
        fn tick(&mut self, ctx: &mut Vec<usize>) -> Status {
            ctx[self.slot] += 1;
            if self.statuses.len() > 1 {
                self.statuses.remove(0)
            } else {
                self.statuses[0]
            }
        }
    }

    fn script(slot: usize, statuses: &[Status]) -> BoxedNode<Vec<usize>> {
        Box::new(Script { statuses: statuses.to_vec(), slot })
    }

    #[test]
    fn test_sequence_failing_condition_resets_cursor() {
        let mut seq: Sequence<Vec<usize>> = Sequence::new(vec![
            Box::new(Condition::new(|_: &Vec<usize>| false)) as BoxedNode<Vec<usize>>,
            script(0, &[Status::Success]),
        ]);
        let mut ctx = vec![0];

        assert_eq!(seq.tick(&mut ctx), Status::Failure);
        assert_eq!(seq.cursor(), 0);
        assert_eq!(seq.tick(&mut ctx), Status::Failure);
        assert_eq!(seq.cursor(), 0);
        assert_eq!(ctx[0], 0, "action behind a failing condition never runs");
    }

    #[test]
    fn test_sequence_resumes_running_child() {
        let mut seq = Sequence::new(vec![
            script(0, &[Status::Success]),
            script(1, &[Status::Running, Status::Running, Status::Success]),
        ]);
        let mut ctx = vec![0, 0];

        assert_eq!(seq.tick(&mut ctx), Status::Running);
        assert_eq!(seq.cursor(), 1);
        assert_eq!(seq.tick(&mut ctx), Status::Running);
        assert_eq!(seq.tick(&mut ctx), Status::Success);
        assert_eq!(seq.cursor(), 0);

        // First child ran once; the running one was resumed, not restarted
        assert_eq!(ctx, vec![1, 3]);
    }

    #[test]
    fn test_fallback_first_non_failure() {
        let mut fb = Fallback::new(vec![
            script(0, &[Status::Failure]),
            script(1, &[Status::Running, Status::Success]),
            script(2, &[Status::Success]),
        ]);
        let mut ctx = vec![0, 0, 0];

        assert_eq!(fb.tick(&mut ctx), Status::Running);
        assert_eq!(fb.cursor(), 1);
        assert_eq!(fb.tick(&mut ctx), Status::Success);
        assert_eq!(fb.cursor(), 0);
        assert_eq!(ctx, vec![1, 2, 0]);
    }

    #[test]
    fn test_fallback_all_fail() {
        let mut fb = Fallback::new(vec![script(0, &[Status::Failure]), script(1, &[Status::Failure])]);
        let mut ctx = vec![0, 0];
        assert_eq!(fb.tick(&mut ctx), Status::Failure);
        assert_eq!(fb.cursor(), 0);
    }

    #[test]
    fn test_empty_composites() {
        let mut ctx = vec![];
        assert_eq!(Sequence::<Vec<usize>>::new(vec![]).tick(&mut ctx), Status::Success);
        assert_eq!(Fallback::<Vec<usize>>::new(vec![]).tick(&mut ctx), Status::Failure);
    }
}
