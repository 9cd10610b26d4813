//! Sigil-scoped variable substitution.
//!
//! A [`VariableContext`] lists, per sigil, the scopes searched for a name
//! in priority order.  [`replace`] rewrites every `sigil + name` it can
//! resolve and leaves the rest alone:
//!
//! - Names are made of `[A-Za-z0-9_.-]`.  When the full name does not
//!   resolve, it is shortened from the right until a prefix does and the
//!   dropped suffix is kept verbatim, so `$weapon.noun` works when only
//!   `weapon` exists.
//! - `$name[i]` and `$name(i)` index into a `|`-separated list.  The index is
//!   substituted first.  An out-of-range index leaves the original text
//!   untouched; a non-integer index substitutes the list but keeps the
//!   bracketed index text.
//! - Passes repeat until nothing changes, at most [`MAX_ITERATIONS`] times,
//!   so values that themselves contain variables are expanded.  Passes also
//!   stop once the text grows past [`MAX_EXPANDED_LEN`] bytes.

use crate::var::{VarScope, VariableStore};

/// Upper bound on substitution passes.
pub const MAX_ITERATIONS: usize = 15;

/// Output length after which no further pass runs.
pub const MAX_EXPANDED_LEN: usize = 16 * 1024;

/// Where a sigil looks names up.
#[derive(Clone, Copy)]
pub enum Source<'a> {
    Scope(&'a VarScope),
    Global(&'a VariableStore),
}

impl Source<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        match self {
            Source::Scope(scope) => scope.get(name).map(str::to_owned),
            Source::Global(store) => store.get(name),
        }
    }
}

impl<'a> From<&'a VarScope> for Source<'a> {
    fn from(scope: &'a VarScope) -> Self {
        Source::Scope(scope)
    }
}

impl<'a> From<&'a VariableStore> for Source<'a> {
    fn from(store: &'a VariableStore) -> Self {
        Source::Global(store)
    }
}

/// Ordered sigil registrations.
#[derive(Default, Clone)]
pub struct VariableContext<'a> {
    entries: Vec<(char, Vec<Source<'a>>)>,
}

impl<'a> VariableContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `source` to the search list for `sigil`.
    pub fn with(mut self, sigil: char, source: impl Into<Source<'a>>) -> Self {
        let source = source.into();
        match self.entries.iter_mut().find(|(s, _)| *s == sigil) {
            Some((_, sources)) => sources.push(source),
            None => self.entries.push((sigil, vec![source])),
        }
        self
    }

    pub fn has_sigil(&self, sigil: char) -> bool {
        self.entries.iter().any(|(s, _)| *s == sigil)
    }

    /// Resolve `name` under `sigil`, first scope wins.
    pub fn lookup(&self, sigil: char, name: &str) -> Option<String> {
        let (_, sources) = self.entries.iter().find(|(s, _)| *s == sigil)?;
        sources.iter().find_map(|src| src.lookup(name))
    }

    fn sigils(&self) -> impl Iterator<Item = char> + '_ {
        self.entries.iter().map(|(s, _)| *s)
    }
}

/// Substitute every resolvable variable in `text`.
pub fn replace(text: &str, ctx: &VariableContext<'_>) -> String {
    if !text.chars().any(|c| ctx.has_sigil(c)) {
        return text.to_owned();
    }

    let mut segments = vec![Segment::open(text)];
    for _ in 0..MAX_ITERATIONS {
        let before = join(&segments);

        let mut indexed = Vec::with_capacity(segments.len());
        for seg in segments {
            if seg.protected {
                indexed.push(seg);
            } else {
                indexed.extend(indexed_pass(&seg.text, ctx));
            }
        }

        segments = merge_open(indexed);
        for seg in segments.iter_mut().filter(|s| !s.protected) {
            for sigil in ctx.sigils() {
                seg.text = replace_sigil(&seg.text, sigil, ctx);
            }
        }

        let after = join(&segments);
        if after == before || after.len() > MAX_EXPANDED_LEN {
            break;
        }
    }
    join(&segments)
}

// ── Segments ──────────────────────────────────────────────────────────────────

/// A run of text; protected runs are never substituted again.
#[derive(Debug, Clone, PartialEq)]
struct Segment {
    text: String,
    protected: bool,
}

impl Segment {
    fn open(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            protected: false,
        }
    }

    fn protected(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            protected: true,
        }
    }
}

fn join(segments: &[Segment]) -> String {
    segments.iter().map(|s| s.text.as_str()).collect()
}

fn merge_open(segments: Vec<Segment>) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match out.last_mut() {
            Some(last) if !last.protected && !seg.protected => last.text.push_str(&seg.text),
            _ => out.push(seg),
        }
    }
    out
}

// ── Indexed pre-pass ──────────────────────────────────────────────────────────

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_index_char(c: char) -> bool {
    is_name_char(c) || matches!(c, '$' | '%' | '&')
}

/// One `sigil name open index close` occurrence, as byte offsets.
struct IndexedRef<'t> {
    start: usize,
    end: usize,
    sigil: char,
    name: &'t str,
    open: char,
    index: &'t str,
    close: char,
}

/// Find the next indexed reference at or after `from`.
fn next_indexed(text: &str, from: usize) -> Option<IndexedRef<'_>> {
    let mut search = from;
    while let Some(off) = text[search..].find(['$', '%', '&']) {
        let start = search + off;
        if let Some(r) = indexed_at(text, start) {
            return Some(r);
        }
        search = start + 1;
    }
    None
}

fn indexed_at(text: &str, start: usize) -> Option<IndexedRef<'_>> {
    let mut cur = crate::cursor::Cursor::new(&text[start..]);
    let sigil = cur.bump()?;
    let name = cur.consume_while(is_name_char);
    if name.is_empty() {
        return None;
    }
    let open = cur.peek().filter(|c| matches!(c, '[' | '('))?;
    cur.bump();
    let index = cur.consume_while(is_index_char);
    if index.is_empty() {
        return None;
    }
    let close = cur.peek().filter(|c| matches!(c, ']' | ')'))?;
    cur.bump();
    Some(IndexedRef {
        start,
        end: start + cur.position(),
        sigil,
        name,
        open,
        index,
        close,
    })
}

fn indexed_pass(text: &str, ctx: &VariableContext<'_>) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut last = 0;
    let mut from = 0;
    while let Some(r) = next_indexed(text, from) {
        from = r.end;
        if !ctx.has_sigil(r.sigil) {
            continue;
        }
        let Some(list) = ctx.lookup(r.sigil, r.name) else {
            continue;
        };
        let index = replace(r.index, ctx);

        out.push(Segment::open(&text[last..r.start]));
        match index.trim().parse::<i64>() {
            Ok(i) => {
                let item = usize::try_from(i).ok().and_then(|i| list.split('|').nth(i));
                match item {
                    Some(item) => out.push(Segment::open(item)),
                    None => out.push(Segment::protected(&text[r.start..r.end])),
                }
            }
            Err(_) => out.push(Segment::protected(format!(
                "{list}{}{index}{}",
                r.open, r.close
            ))),
        }
        last = r.end;
    }
    out.push(Segment::open(&text[last..]));
    out
}

// ── Main pass ─────────────────────────────────────────────────────────────────

/// Resolve the longest prefix of `name` that exists under `sigil`.
///
/// Returns the value and the number of bytes of `name` it consumed.
fn resolve_prefix(sigil: char, name: &str, ctx: &VariableContext<'_>) -> Option<(String, usize)> {
    (1..=name.len())
        .rev()
        .find_map(|end| ctx.lookup(sigil, &name[..end]).map(|v| (v, end)))
}

fn replace_sigil(text: &str, sigil: char, ctx: &VariableContext<'_>) -> String {
    if !text.contains(sigil) {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(sigil) {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + sigil.len_utf8()..];
        let name_len = after.find(|c| !is_name_char(c)).unwrap_or(after.len());
        let name = &after[..name_len];
        match resolve_prefix(sigil, name, ctx) {
            Some((value, used)) => {
                out.push_str(&value);
                out.push_str(&name[used..]);
            }
            None => {
                out.push(sigil);
                out.push_str(name);
            }
        }
        rest = &after[name_len..];
    }
    out.push_str(rest);
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn globals(pairs: &[(&str, &str)]) -> VariableStore {
        let store = VariableStore::empty();
        for (k, v) in pairs {
            store.set(*k, *v);
        }
        store
    }

    fn run(text: &str, pairs: &[(&str, &str)]) -> String {
        let store = globals(pairs);
        let ctx = VariableContext::new().with('$', &store);
        replace(text, &ctx)
    }

    #[test]
    fn replaces_globals() {
        assert_eq!(
            run("Greetings $charactername", &[("charactername", "Obi-Wan")]),
            "Greetings Obi-Wan"
        );
    }

    #[test]
    fn longest_name_wins() {
        assert_eq!(
            run("$brawling_moves", &[("brawling_moves", "one|two|three"), ("brawl", "NO")]),
            "one|two|three"
        );
        assert_eq!(
            run(
                "get my $pouch in my $pouch.container",
                &[("pouch", "gem pouch"), ("pouch.container", "rucksack")]
            ),
            "get my gem pouch in my rucksack"
        );
    }

    #[test]
    fn prefix_resolution_keeps_suffix() {
        assert_eq!(run("$weapon.", &[("weapon", "sword")]), "sword.");
    }

    #[test]
    fn unresolved_stays_literal() {
        assert_eq!(run("$brawling_moves", &[("testing", "one")]), "$brawling_moves");
    }

    #[test]
    fn indexed_brackets_and_parens() {
        let w = [("weapons", "one|two|three")];
        assert_eq!(run("$weapons[0]", &w), "one");
        assert_eq!(run("$weapons(2)", &w), "three");
        assert_eq!(run("$Parse.Arcana(0)", &[("Parse.Arcana", "1200|00")]), "1200");
    }

    #[test]
    fn unclosed_index_is_plain_variable() {
        let vars = [
            ("weapons", "one|two|three"),
            ("exits", "north|south"),
            ("lefthand", "tankard"),
        ];
        assert_eq!(run("$weapons(0", &vars), "one|two|three(0");
        assert_eq!(
            run("$weapons(0  $lefthand $exits[1]", &vars),
            "one|two|three(0  tankard south"
        );
        assert_eq!(
            run("$weapons(0  $exits[1]  $lefthand ", &vars),
            "one|two|three(0  south  tankard "
        );
    }

    #[test]
    fn out_of_range_index_is_left_alone() {
        let l = [("list", "a|b|c")];
        assert_eq!(run("$list[5]", &l), "$list[5]");
        assert_eq!(run("$list[1]", &l), "b");
        assert_eq!(run("$list[-1]", &l), "$list[-1]");
    }

    #[test]
    fn non_integer_index_keeps_brackets() {
        assert_eq!(run("$list[abc]", &[("list", "a|b")]), "a|b[abc]");
    }

    #[test]
    fn chained_indexed_variables() {
        let vars = [
            ("list", "hisan|nemoih"),
            ("nemoih", "3"),
            ("space", " "),
            ("c", "1"),
        ];
        assert_eq!(run("$space$$list[$c]", &vars), " 3");
        assert_eq!(run("$space$space$$list[$c]", &vars), "  3");
        assert_eq!(run("$space$$list[$c]$space", &vars), " 3 ");
        assert_eq!(run("$$list[$c]$space$space", &vars), "3  ");
        assert_eq!(run("$$list[$c]$space$space$$list[$c]", &vars), "3  3");
    }

    #[test]
    fn nested_names_resolve_over_passes() {
        assert_eq!(
            run(
                "$$skill.LearningRate",
                &[("skill", "Stealth"), ("Stealth.LearningRate", "34")]
            ),
            "34"
        );
    }

    #[test]
    fn delimiters_untouched() {
        assert_eq!(run("( ) [] [one] \\( ]", &[]), "( ) [] [one] \\( ]");
        assert_eq!(run("testing(0]", &[("testing", "tankard")]), "testing(0]");
    }

    #[test]
    fn regex_text_only_substitutes_variables() {
        let text = "matchre(\"$dir\", \"^(swim|climb) \\d+$\")";
        assert_eq!(
            run(text, &[("dir", "swim west")]),
            "matchre(\"swim west\", \"^(swim|climb) \\d+$\")"
        );
    }

    #[test]
    fn sigil_priority_follows_registration() {
        let store = globals(&[("1", "global")]);
        let mut regex = VarScope::new();
        regex.set("1", "captured");
        let ctx = VariableContext::new().with('$', &regex).with('$', &store);
        assert_eq!(replace("$1", &ctx), "captured");
    }

    #[test]
    fn unregistered_sigil_is_literal() {
        let store = globals(&[("x", "1")]);
        let ctx = VariableContext::new().with('$', &store);
        assert_eq!(replace("%x &x $x", &ctx), "%x &x 1");
    }

    #[test]
    fn mixed_sigils_expand_across_passes() {
        let store = globals(&[("Offhand_Weapon.LearningRate", "5")]);
        let mut script = VarScope::new();
        script.set("next_weapon", "Offhand_Weapon");
        let ctx = VariableContext::new()
            .with('$', &store)
            .with('%', &script);
        assert_eq!(replace("$%next_weapon.LearningRate", &ctx), "5");
    }

    #[test]
    fn self_referencing_value_terminates() {
        let out = run("$x", &[("x", "$x!")]);
        assert!(out.starts_with("$x!"));
        assert!(out.ends_with('!'));
    }

    #[test]
    fn doubling_value_stops_growing() {
        let out = run("$a", &[("a", "$a$a")]);
        // Stops one pass past the limit, well short of the iteration cap.
        assert_eq!(out.len(), 2 * MAX_EXPANDED_LEN);
        assert!(out.starts_with("$a"));
    }
}
