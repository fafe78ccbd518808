//! Git-like operations: commit, branch, diff, merge

mod branch;
mod commit;
mod diff;
mod history;
mod merge;

pub use branch::BranchRegistry;
pub use commit::{CommitLog, NewCommit};
pub use diff::{commits_between, diff, Diff};
pub use history::{
    ancestor_set, ancestors, commit_distances, entity_fields_at, field_values_at, is_ancestor, log,
    Ancestors, AncestorsWithDepth,
};
pub use merge::{
    find_common_ancestor, merge_branches, plan_merge, MergeOutcome, MergePlan, MergeRequest,
};

pub(crate) use branch::create_branch_in;
pub(crate) use commit::{append_in, conflict as commit_conflict};
