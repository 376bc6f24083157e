//! Tool-name mapping between the canonical tool vocabulary and whatever
//! names a given upstream or caller actually uses.
//!
//! Callers and providers alike are free to rename tools (a caller might
//! expose `read_file` where we expect `Read`, or a provider's own built-in
//! tool-use training might emit `str_replace_editor` for what we'd call
//! `Edit`). This module keeps a process-wide, thread-safe table of known
//! aliases and the canonical names they resolve to, so the rest of the
//! gateway only ever has to reason about the canonical vocabulary.

use std::collections::HashMap;
use std::sync::RwLock;

/// The canonical tool names the gateway understands out of the box. Callers
/// may use entirely different names for entirely different tools; this list
/// only seeds the initial alias table; [`add_custom_mapping`] extends it.
pub(crate) const CANONICAL_TOOL_NAMES: &[&str] = &[
    "Write",
    "Read",
    "Edit",
    "MultiEdit",
    "Bash",
    "Glob",
    "Grep",
    "LS",
    "WebFetch",
    "WebSearch",
    "TodoWrite",
    "Task",
    "NotebookRead",
    "NotebookEdit",
];

/// Common OpenAI-function-calling and fine-tuned-model spellings observed
/// in the wild for each canonical tool, seeded alongside the canonical
/// names themselves. Keyed lowercase; values are the canonical name.
const WILD_ALIASES: &[(&str, &str)] = &[
    ("write_to_file", "Write"),
    ("create_file", "Write"),
    ("write_file", "Write"),
    ("read_file", "Read"),
    ("view_file", "Read"),
    ("cat_file", "Read"),
    ("edit_file", "Edit"),
    ("str_replace_editor", "Edit"),
    ("str_replace", "Edit"),
    ("multi_edit_file", "MultiEdit"),
    ("run_command", "Bash"),
    ("execute_bash", "Bash"),
    ("execute_command", "Bash"),
    ("shell", "Bash"),
    ("terminal", "Bash"),
    ("glob_files", "Glob"),
    ("find_files", "Glob"),
    ("search_files", "Grep"),
    ("grep_search", "Grep"),
    ("list_directory", "LS"),
    ("list_files", "LS"),
    ("fetch_url", "WebFetch"),
    ("browse_url", "WebFetch"),
    ("web_search", "WebSearch"),
    ("search_web", "WebSearch"),
    ("todo_write", "TodoWrite"),
    ("update_todos", "TodoWrite"),
    ("run_task", "Task"),
    ("dispatch_agent", "Task"),
    ("read_notebook", "NotebookRead"),
    ("edit_notebook", "NotebookEdit"),
];

fn seed_openai_aliases() -> HashMap<String, String> {
    let mut map = HashMap::new();
    for &canonical in CANONICAL_TOOL_NAMES {
        map.insert(canonical.to_ascii_lowercase(), canonical.to_string());
    }
    for &(alias, canonical) in WILD_ALIASES {
        map.insert(alias.to_string(), canonical.to_string());
    }
    map
}

struct ToolNameTable {
    /// Keyed by lowercase alias, valued by canonical name.
    aliases: RwLock<HashMap<String, String>>,
}

static TABLE: std::sync::OnceLock<ToolNameTable> = std::sync::OnceLock::new();

fn table() -> &'static ToolNameTable {
    TABLE.get_or_init(|| ToolNameTable {
        aliases: RwLock::new(seed_openai_aliases()),
    })
}

/// Resolve a name coming from an OpenAI-dialect request/response to its
/// canonical form. Matches exactly first, then falls back to a
/// case-insensitive match, and otherwise returns the name unchanged (an
/// unknown tool is passed through rather than rejected).
pub(crate) fn map_openai_to_canonical(name: &str) -> String {
    map_to_canonical(name)
}

/// Resolve a caller-supplied custom tool name to its canonical form.
/// Identical matching rules to [`map_openai_to_canonical`]; kept as a
/// separate entry point since the two call sites reason about different
/// provenance even though the lookup is shared.
pub(crate) fn map_custom_to_canonical(name: &str) -> String {
    map_to_canonical(name)
}

fn map_to_canonical(name: &str) -> String {
    let table = table();
    let aliases = table.aliases.read().expect("tool name table lock poisoned");

    if let Some(canonical) = aliases.get(name) {
        return canonical.clone();
    }

    let lower = name.to_ascii_lowercase();
    if let Some(canonical) = aliases.get(&lower) {
        return canonical.clone();
    }

    name.to_string()
}

/// Map a canonical tool name to the spelling a specific outbound dialect
/// expects. All three dialects we speak pass tool names through verbatim
/// today (none of them impose a reserved-word collision), so this is
/// presently an identity function; it exists as a named seam so a future
/// per-dialect rename doesn't require touching every call site.
pub(crate) fn map_canonical_to_dialect(name: &str, _dialect: crate::messages::Dialect) -> String {
    name.to_string()
}

/// Register a custom alias for a canonical tool name at runtime, e.g. when a
/// channel's configuration declares that it calls `Read` by the name
/// `fs_read`. Case-insensitive: the alias is stored lowercased.
pub(crate) fn add_custom_mapping(alias: &str, canonical: &str) {
    let table = table();
    let mut aliases = table.aliases.write().expect("tool name table lock poisoned");
    aliases.insert(alias.to_ascii_lowercase(), canonical.to_string());
}

/// Whether a name (exact or case-insensitive) is already known to the table,
/// either as a canonical name itself or as a registered alias.
pub(crate) fn is_known(name: &str) -> bool {
    let table = table();
    let aliases = table.aliases.read().expect("tool name table lock poisoned");
    aliases.contains_key(name) || aliases.contains_key(&name.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_canonical_name_maps_to_itself() {
        assert_eq!(map_openai_to_canonical("Write"), "Write");
    }

    #[test]
    fn case_insensitive_match_resolves_to_canonical_casing() {
        assert_eq!(map_openai_to_canonical("write"), "Write");
        assert_eq!(map_openai_to_canonical("WRITE"), "Write");
    }

    #[test]
    fn unknown_name_passes_through_unchanged() {
        assert_eq!(map_openai_to_canonical("some_custom_tool"), "some_custom_tool");
    }

    #[test]
    fn custom_mapping_is_honored_after_registration() {
        add_custom_mapping("fs_read_unique_test", "Read");
        assert_eq!(map_custom_to_canonical("fs_read_unique_test"), "Read");
        assert_eq!(map_custom_to_canonical("FS_READ_UNIQUE_TEST"), "Read");
    }

    #[test]
    fn is_known_reports_registered_aliases() {
        assert!(is_known("Bash"));
        assert!(is_known("bash"));
        assert!(!is_known("totally_unregistered_xyz"));
    }
}
