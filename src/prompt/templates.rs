//! Default prompt template sources.
//!
//! Not a distillation of anything particular — the wording is ours,
//! the structure (explicit claim/do/close/push steps, question-escape
//! protocol, merge-resolution guardrails) follows spec §4.4.

pub const TASK_TEMPLATE: &str = r#"You are working bead {{ bead.id }}: {{ bead.title }}

{{ bead.description }}

Steps:
1. Claim this bead in the tracker before doing any work.
2. Make the change described above, in this worktree only.
3. Run whatever checks are appropriate for the change.
4. Close the bead and push your branch.

If you get stuck on a decision only a human can make, do not guess:
create a new bead labelled `needs-human` describing the question, add
it as a blocking dependency of {{ bead.id }}, and stop without closing
{{ bead.id }}.
"#;

pub const EPIC_TEMPLATE: &str = r#"You are working epic {{ bead.id }}: {{ bead.title }}

{{ bead.description }}

Process this epic's ready children one at a time, in the tracker's
reported order. Do not close the epic itself while any child remains
open. If a child needs a human decision, escalate it the same way an
ordinary task would (a `needs-human` bead blocking the child), then
move on to the next ready child.
"#;

pub const VERIFY_TEMPLATE: &str = r#"Audit epic {{ bead.id }}: {{ bead.title }}

Children:
{% for child in children %}
- {{ child.id }} ({{ child.status }}{% if child.needs_human %}, needs-human{% endif %}): {{ child.title }}
{% endfor %}

For each child: closed children count as success, open children with
an open `needs-human` blocker count as question, everything else
counts as failure. Summarize the result; do not close children
yourself.
"#;

pub const MERGE_RESOLUTION_TEMPLATE: &str = r#"Resolve the merge conflict between {{ source_branch }} and {{ target_branch }}.

Conflicting files:
{% for file in conflicting_files %}
- {{ file }}
{% endfor %}

Resolve every conflict marker in place and stage your resolution. Do
not abort the merge and do not push. Leave the result committed or
staged for commit in this worktree.
"#;
