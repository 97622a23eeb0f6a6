//! Outline domain library: numbered tasks grouped into sections, nested up to five levels.
//! The core stays pure: text goes in, the tree is rewritten in memory, canonical text
//! comes out. Persistence lives behind `storage`, the command surface in the binary.

pub mod core {
    use serde::{Deserialize, Serialize};
    use std::{fmt, str::FromStr};

    /* ----------------------------- Constants ----------------------------- */

    /// Deepest level a node may sit at. Level 1 is a main item, 2..=5 are sub-items.
    pub const MAX_DEPTH: u8 = 5;

    /// Level of the shallowest sub-item.
    pub const MIN_SUB_LEVEL: u8 = 2;

    /// Spaces per nesting level beyond the item line.
    pub const INDENT_WIDTH: usize = 4;

    /// Leading whitespace of a sub-item line at `level`.
    pub fn indent_for(level: u8) -> String {
        " ".repeat(INDENT_WIDTH * usize::from(level.saturating_sub(1)))
    }

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: a whole outline document.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Outline {
        /// Lines before the first section header, kept verbatim (blank lines are dropped).
        #[serde(default)]
        pub preamble: Vec<String>,

        /// Sections in document order. Their numbers follow from position.
        #[serde(default)]
        pub sections: Vec<Section>,
    }

    impl Outline {
        pub fn new() -> Self {
            Self::default()
        }
    }

    /// A named, ordered group of main items. The name is the identity key and is
    /// matched case-insensitively.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Section {
        pub name: String,
        #[serde(default)]
        pub items: Vec<Task>,
    }

    impl Section {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                items: vec![],
            }
        }

        pub fn matches(&self, name: &str) -> bool {
            self.name.to_lowercase() == name.to_lowercase()
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// A node of the outline: a main item at level 1 or a sub-item at levels 2..=5.
    ///
    /// Numbers are never stored on the node; they are derived from position by
    /// `numbering`. `level` is kept in step with the node's depth by every mutation.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Task {
        pub completed: bool,
        pub text: String,
        pub level: u8,
        #[serde(default)]
        pub children: Vec<Task>,
    }

    impl Task {
        /// A main item (level 1).
        pub fn item(text: impl Into<String>, completed: bool) -> Self {
            Self {
                completed,
                text: text.into(),
                level: 1,
                children: vec![],
            }
        }

        pub fn sub_item(level: u8, text: impl Into<String>, completed: bool) -> Self {
            Self {
                completed,
                text: text.into(),
                level,
                children: vec![],
            }
        }

        pub fn is_item(&self) -> bool {
            self.level == 1
        }

        /// Number of levels this subtree spans, counting the node itself.
        pub fn height(&self) -> u8 {
            1 + self.children.iter().map(Task::height).max().unwrap_or(0)
        }

        /// Re-levels the subtree so that this node sits at `level`.
        pub fn retag(&mut self, level: u8) {
            self.level = level;
            for child in &mut self.children {
                child.retag(level + 1);
            }
        }

        /// Number of nodes below this one.
        pub fn descendant_count(&self) -> usize {
            self.children
                .iter()
                .map(|c| 1 + c.descendant_count())
                .sum()
        }
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// Dotted positional path such as `3.2.1`: the root segment is the global item
    /// number, each further segment a 1-based position among siblings.
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct NodePath(Vec<usize>);

    impl NodePath {
        pub fn item(number: usize) -> Self {
            Self(vec![number])
        }

        /// Builds a path from raw segments; `None` when empty or a segment is zero.
        pub fn from_segments(segments: Vec<usize>) -> Option<Self> {
            if segments.is_empty() || segments.contains(&0) {
                None
            } else {
                Some(Self(segments))
            }
        }

        pub fn segments(&self) -> &[usize] {
            &self.0
        }

        /// Global number of the main item this path starts from.
        pub fn root(&self) -> usize {
            self.0.first().copied().unwrap_or(0)
        }

        /// Level implied by the path: one per segment.
        pub fn level(&self) -> u8 {
            u8::try_from(self.0.len()).unwrap_or(u8::MAX)
        }

        pub fn is_item(&self) -> bool {
            self.0.len() == 1
        }

        pub fn child(&self, position: usize) -> Self {
            let mut segments = self.0.clone();
            segments.push(position);
            Self(segments)
        }

        pub fn parent(&self) -> Option<Self> {
            match self.0.split_last() {
                Some((_, rest)) if !rest.is_empty() => Some(Self(rest.to_vec())),
                _ => None,
            }
        }
    }

    impl fmt::Display for NodePath {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            for (i, segment) in self.0.iter().enumerate() {
                if i > 0 {
                    f.write_str(".")?;
                }
                write!(f, "{segment}")?;
            }
            Ok(())
        }
    }

    impl FromStr for NodePath {
        type Err = OutlineError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let invalid = || OutlineError::InvalidPath(s.to_string());
            let segments = s
                .trim()
                .split('.')
                .map(|part| part.parse::<usize>().map_err(|_| invalid()))
                .collect::<Result<Vec<_>, _>>()?;
            Self::from_segments(segments).ok_or_else(invalid)
        }
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum OutlineError {
        #[error("{0} does not exist")]
        NotFound(String),
        #[error("section '{0}' does not exist")]
        SectionNotFound(String),
        #[error("section '{0}' already exists")]
        DuplicateSection(String),
        #[error("{0} would go deeper than level {max}", max = MAX_DEPTH)]
        DepthExceeded(String),
        #[error("{0} is already at level {min} and cannot be promoted", min = MIN_SUB_LEVEL)]
        AlreadyAtMinDepth(String),
        #[error("{target} is at level {found}, expected level {expected}")]
        LevelMismatch {
            target: String,
            expected: u8,
            found: u8,
        },
        #[error("position {position} is out of range (1..={total})")]
        InvalidPosition { position: usize, total: usize },
        #[error("'{0}' is not a valid dotted path")]
        InvalidPath(String),
        #[error("{0} must be a single non-empty line")]
        InvalidText(String),
        #[error("invalid target: {0}")]
        InvalidTarget(String),
    }

}

pub mod lookup {
    //! Lookup index over an `Outline`.
    //!
    //! Numbers are positional, so resolving a dotted path is plain indexing: the root
    //! segment selects a main item by its global position across sections, every
    //! further segment selects a child by its 1-based position. `locate` is the single
    //! traversal primitive; it returns a `Location` handle that the mutation engine uses
    //! to reach both the node and the list holding it.

    use crate::core::*;

    /// Resolved position of a node: section index, index within that section, then the
    /// 0-based child indices leading down to the node. Valid until the next structural change.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Location {
        pub section: usize,
        pub index: usize,
        pub trail: Vec<usize>,
    }

    impl Location {
        pub fn level(&self) -> u8 {
            1 + u8::try_from(self.trail.len()).unwrap_or(u8::MAX - 1)
        }

        pub fn is_item(&self) -> bool {
            self.trail.is_empty()
        }

        /// True when `other` is this node or lies inside its subtree.
        pub fn contains(&self, other: &Location) -> bool {
            self.section == other.section
                && self.index == other.index
                && other.trail.starts_with(&self.trail)
        }

        /// Where this location points once the sub-item at `removed` has been taken
        /// out of its sibling list.
        pub fn after_removal_of(&self, removed: &Location) -> Location {
            let mut out = self.clone();
            if self.section != removed.section || self.index != removed.index {
                return out;
            }
            if let Some((&gone, parents)) = removed.trail.split_last() {
                let depth = parents.len();
                if out.trail.len() > depth
                    && out.trail[..depth] == *parents
                    && out.trail[depth] > gone
                {
                    out.trail[depth] -= 1;
                }
            }
            out
        }
    }

    impl Outline {
        pub fn item_count(&self) -> usize {
            self.sections.iter().map(|s| s.items.len()).sum()
        }

        pub fn section_index(&self, name: &str) -> Option<usize> {
            self.sections.iter().position(|s| s.matches(name))
        }

        pub fn find_section(&self, name: &str) -> Option<&Section> {
            self.sections.iter().find(|s| s.matches(name))
        }

        /// Section and in-section index of the main item with global number `number`.
        pub fn locate_item(&self, number: usize) -> Option<(usize, usize)> {
            let mut remaining = number.checked_sub(1)?;
            for (s, section) in self.sections.iter().enumerate() {
                if remaining < section.items.len() {
                    return Some((s, remaining));
                }
                remaining -= section.items.len();
            }
            None
        }

        pub fn find_item(&self, number: usize) -> Option<&Task> {
            let (s, i) = self.locate_item(number)?;
            self.sections.get(s)?.items.get(i)
        }

        /// Resolves a dotted path to a location handle.
        pub fn locate(&self, path: &NodePath) -> Option<Location> {
            let (section, index) = self.locate_item(path.root())?;
            let mut node = self.sections.get(section)?.items.get(index)?;
            let mut trail = Vec::with_capacity(path.segments().len().saturating_sub(1));
            for &position in path.segments().iter().skip(1) {
                let i = position.checked_sub(1)?;
                node = node.children.get(i)?;
                trail.push(i);
            }
            Some(Location {
                section,
                index,
                trail,
            })
        }

        pub fn task(&self, location: &Location) -> Option<&Task> {
            let mut node = self
                .sections
                .get(location.section)?
                .items
                .get(location.index)?;
            for &i in &location.trail {
                node = node.children.get(i)?;
            }
            Some(node)
        }

        pub fn task_mut(&mut self, location: &Location) -> Option<&mut Task> {
            let mut node = self
                .sections
                .get_mut(location.section)?
                .items
                .get_mut(location.index)?;
            for &i in &location.trail {
                node = node.children.get_mut(i)?;
            }
            Some(node)
        }

        /// The list that holds the node at `location`: its section's items for a main
        /// item, its parent's children for a sub-item.
        pub fn container_mut(&mut self, location: &Location) -> Option<&mut Vec<Task>> {
            let section = self.sections.get_mut(location.section)?;
            let Some((_, parents)) = location.trail.split_last() else {
                return Some(&mut section.items);
            };
            let mut node = section.items.get_mut(location.index)?;
            for &i in parents {
                node = node.children.get_mut(i)?;
            }
            Some(&mut node.children)
        }

        pub fn find(&self, path: &NodePath) -> Option<&Task> {
            self.task(&self.locate(path)?)
        }

        pub fn find_mut(&mut self, path: &NodePath) -> Option<&mut Task> {
            let location = self.locate(path)?;
            self.task_mut(&location)
        }

        /// Sub-item lookup by dotted path string; main-item paths do not match.
        pub fn find_sub_item(&self, path: &str) -> Option<&Task> {
            let path = path.parse::<NodePath>().ok()?;
            if path.is_item() {
                return None;
            }
            self.find(&path)
        }

        /// Sibling list containing the sub-item at `path`.
        pub fn find_parent_container(&mut self, path: &str) -> Option<&mut Vec<Task>> {
            let path = path.parse::<NodePath>().ok()?;
            if path.is_item() {
                return None;
            }
            let location = self.locate(&path)?;
            self.container_mut(&location)
        }
    }

}

pub mod parser {
    //! Line-oriented outline parser built on `nom`.
    //!
    //! Each line is classified with small `nom` grammars: section header, main item, or
    //! sub-item at a given indentation. Numbers written in the text are decorative; the
    //! only use of a sub-item's dotted number is to find its parent among the sub-items
    //! already read for the current main item.
    //!
    //! Lines that fit nowhere are dropped rather than rejected, since outlines are edited
    //! by hand. `parse_outline_with_report` lists what was dropped and why.

    use crate::core::*;
    use nom::{
        IResult,
        branch::alt,
        bytes::complete::{tag, take_while1},
        character::complete::{char, digit1},
        combinator::{map, rest, value, verify},
        error::VerboseError,
        sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    };
    use serde::Serialize;
    use tracing::{debug, trace, warn};

    /* ------------------------ Public entry points ------------------------ */

    #[derive(Debug, thiserror::Error)]
    pub enum ParseError {
        #[error("outline is not valid UTF-8: {0}")]
        InvalidUtf8(#[from] std::str::Utf8Error),
    }

    /// Parse an outline from text. Never fails; malformed lines are dropped.
    pub fn parse_outline(input: &str) -> Outline {
        parse_outline_with_report(input).0
    }

    /// Checks that raw outline bytes are UTF-8 text.
    pub fn decode(input: &[u8]) -> Result<&str, ParseError> {
        Ok(std::str::from_utf8(input)?)
    }

    /// Parse an outline from raw bytes, failing only when they are not UTF-8.
    pub fn parse_outline_bytes(input: &[u8]) -> Result<Outline, ParseError> {
        decode(input).map(parse_outline)
    }

    /// Parse an outline and report every non-blank line that was dropped.
    pub fn parse_outline_with_report(input: &str) -> (Outline, ParseReport) {
        let mut cursor = Cursor::default();
        for (idx, line) in input.lines().enumerate() {
            cursor.consume(idx + 1, line);
        }
        (cursor.outline, cursor.report)
    }

    /* ------------------------------ Report ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum DropReason {
        /// Starts with `##` but is not a `## <n>. <name>` header.
        MalformedHeader,
        /// A sub-item line with no main item above it in the section.
        OutsideItem,
        /// Dotted number has the wrong segment count for its indentation.
        SegmentMismatch,
        /// No sub-item with the parent's dotted number exists under the current item.
        OrphanSubItem,
        Unrecognized,
    }

    impl DropReason {
        pub fn describe(self) -> &'static str {
            match self {
                DropReason::MalformedHeader => "malformed section header",
                DropReason::OutsideItem => "sub-item outside of a main item",
                DropReason::SegmentMismatch => "number does not match indentation depth",
                DropReason::OrphanSubItem => "parent sub-item not found",
                DropReason::Unrecognized => "unrecognized line",
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct DroppedLine {
        /// 1-based line number in the input.
        pub line: usize,
        pub text: String,
        pub reason: DropReason,
    }

    /// A section header whose name matches an earlier section's name, ignoring case.
    /// Name lookups only ever reach the first of them.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ShadowedSection {
        pub line: usize,
        pub name: String,
        /// Name of the earlier section, as written.
        pub shadowed_by: String,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct ParseReport {
        pub dropped: Vec<DroppedLine>,
        pub shadowed_sections: Vec<ShadowedSection>,
    }

    impl ParseReport {
        pub fn is_clean(&self) -> bool {
            self.dropped.is_empty() && self.shadowed_sections.is_empty()
        }
    }

    /* ------------------------------ Cursor ------------------------------ */

    /// Parser state threaded through the line consumer.
    #[derive(Default)]
    struct Cursor {
        outline: Outline,
        report: ParseReport,
        /// Dotted numbers as written for the current item's sub-items, shaped like the
        /// tree. `None` until a main item has been read in the current section.
        numbers: Option<Vec<Written>>,
    }

    #[derive(Default)]
    struct Written {
        number: String,
        children: Vec<Written>,
    }

    struct SubLine<'a> {
        completed: bool,
        number: &'a str,
        text: &'a str,
    }

    impl Cursor {
        fn consume(&mut self, line_no: usize, line: &str) {
            if self.outline.sections.is_empty() && !line.starts_with("##") {
                if !line.trim().is_empty() {
                    self.outline.preamble.push(line.to_string());
                }
                return;
            }

            if let Ok((_, name)) = section_header(line) {
                trace!(line = line_no, section = name, "section header");
                if let Some(earlier) = self.outline.find_section(name) {
                    warn!(line = line_no, section = name, "section name repeats an earlier one");
                    self.report.shadowed_sections.push(ShadowedSection {
                        line: line_no,
                        name: name.to_string(),
                        shadowed_by: earlier.name.clone(),
                    });
                }
                self.outline.sections.push(Section::new(name));
                self.numbers = None;
                return;
            }

            if line.trim().is_empty() {
                return;
            }

            if line.starts_with("##") {
                return self.drop_line(line_no, line, DropReason::MalformedHeader);
            }

            if let Ok((_, (completed, text))) = item_line(line) {
                if let Some(section) = self.outline.sections.last_mut() {
                    trace!(line = line_no, "main item");
                    section.items.push(Task::item(text, completed));
                    self.numbers = Some(Vec::new());
                    return;
                }
            }

            if let Err(reason) = self.attach_sub_item(line) {
                self.drop_line(line_no, line, reason);
            }
        }

        fn attach_sub_item(&mut self, line: &str) -> Result<(), DropReason> {
            let mut reason = DropReason::Unrecognized;
            for level in MIN_SUB_LEVEL..=MAX_DEPTH {
                let Ok((_, sub)) = sub_item_line(line, level) else {
                    continue;
                };
                if self.numbers.is_none() {
                    return Err(DropReason::OutsideItem);
                }
                if sub.number.split('.').count() != usize::from(level) {
                    reason = DropReason::SegmentMismatch;
                    continue;
                }
                return self.attach(level, sub);
            }
            Err(reason)
        }

        /// Walks the current item's tree along the written number's prefixes and appends
        /// the new node under the matching parent.
        fn attach(&mut self, level: u8, sub: SubLine<'_>) -> Result<(), DropReason> {
            let item = self
                .outline
                .sections
                .last_mut()
                .and_then(|s| s.items.last_mut())
                .ok_or(DropReason::OutsideItem)?;
            let mut written = self.numbers.as_mut().ok_or(DropReason::OutsideItem)?;
            let mut tasks = &mut item.children;

            let parts: Vec<&str> = sub.number.split('.').collect();
            for depth in usize::from(MIN_SUB_LEVEL)..usize::from(level) {
                let parent_number = parts[..depth].join(".");
                let pos = written
                    .iter()
                    .position(|w| w.number == parent_number)
                    .ok_or(DropReason::OrphanSubItem)?;
                written = &mut written
                    .get_mut(pos)
                    .ok_or(DropReason::OrphanSubItem)?
                    .children;
                tasks = &mut tasks.get_mut(pos).ok_or(DropReason::OrphanSubItem)?.children;
            }

            tasks.push(Task::sub_item(level, sub.text, sub.completed));
            written.push(Written {
                number: sub.number.to_string(),
                children: vec![],
            });
            Ok(())
        }

        fn drop_line(&mut self, line_no: usize, line: &str, reason: DropReason) {
            debug!(line = line_no, reason = reason.describe(), "dropping outline line");
            self.report.dropped.push(DroppedLine {
                line: line_no,
                text: line.to_string(),
                reason,
            });
        }
    }

    /* ------------------------------ Grammars ------------------------------ */

    type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

    /// `## <n>. <name>`
    fn section_header(i: &str) -> PResult<'_, &str> {
        preceded(tuple((tag("## "), digit1, tag(". "))), non_empty_rest)(i)
    }

    /// `<n>. [ |x] <text>`
    fn item_line(i: &str) -> PResult<'_, (bool, &str)> {
        preceded(
            pair(digit1, tag(". ")),
            separated_pair(checkbox, char(' '), non_empty_rest),
        )(i)
    }

    /// `<indent>- [ |x] <dotted> <text>` with the indentation of `level`.
    fn sub_item_line(i: &str, level: u8) -> PResult<'_, SubLine<'_>> {
        let indent = indent_for(level);
        map(
            preceded(
                pair(tag(indent.as_str()), tag("- ")),
                tuple((
                    terminated(checkbox, char(' ')),
                    terminated(dotted_number, char(' ')),
                    non_empty_rest,
                )),
            ),
            |(completed, number, text)| SubLine {
                completed,
                number,
                text,
            },
        )(i)
    }

    fn checkbox(i: &str) -> PResult<'_, bool> {
        delimited(
            char('['),
            alt((value(false, char(' ')), value(true, char('x')))),
            char(']'),
        )(i)
    }

    fn dotted_number(i: &str) -> PResult<'_, &str> {
        take_while1(|c: char| c.is_ascii_digit() || c == '.')(i)
    }

    fn non_empty_rest(i: &str) -> PResult<'_, &str> {
        verify(rest, |s: &str| !s.is_empty())(i)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn grammars_accept_canonical_lines() {
            assert_eq!(section_header("## 3. Backlog").map(|r| r.1).ok(), Some("Backlog"));
            assert_eq!(item_line("12. [x] Ship it").map(|r| r.1).ok(), Some((true, "Ship it")));
            let (_, sub) = sub_item_line("        - [ ] 4.2.1 Deep", 3).expect("sub-item");
            assert!(!sub.completed);
            assert_eq!(sub.number, "4.2.1");
            assert_eq!(sub.text, "Deep");
        }

        #[test]
        fn grammars_reject_near_misses() {
            assert!(section_header("## Backlog").is_err());
            assert!(section_header("## 1. ").is_err());
            assert!(item_line("1. [X] upper-case mark").is_err());
            assert!(item_line("1. [ ]").is_err());
            assert!(sub_item_line("      - [ ] 1.1 six spaces", 2).is_err());
            assert!(sub_item_line("    - [ ] 1.1 level two", 3).is_err());
        }

        #[test]
        fn preamble_keeps_text_and_drops_blank_lines() {
            let input = "# Title\n\nSome notes.\n\n## 1. Alpha\n\n1. [ ] Task\n";
            let outline = parse_outline(input);
            assert_eq!(outline.preamble, vec!["# Title", "Some notes."]);
            assert_eq!(outline.sections.len(), 1);
            assert_eq!(outline.sections[0].items[0].text, "Task");
        }

        #[test]
        fn incoming_numbers_are_ignored() {
            let input = "## 7. Alpha\n\n42. [ ] A\n    - [ ] 42.1 A1\n        - [x] 42.1.1 A11\n43. [x] B\n";
            let outline = parse_outline(input);
            let items = &outline.sections[0].items;
            assert_eq!(items.len(), 2);
            assert_eq!(items[0].children[0].children[0].text, "A11");
            assert!(items[0].children[0].children[0].completed);
            assert_eq!(items[0].children[0].children[0].level, 3);
            assert!(items[1].completed);
        }

        #[test]
        fn malformed_lines_are_dropped_and_reported() {
            let input = "\
## 1. Alpha
    - [ ] 1.1 Before any item
1. [ ] Item
    - [ ] 1.1 Fine
        - [ ] 1.1 Wrong segment count
        - [ ] 1.9.1 Unknown parent
   - [ ] 1.2 Three spaces
## broken header
";
            let (outline, report) = parse_outline_with_report(input);
            let item = &outline.sections[0].items[0];
            assert_eq!(item.children.len(), 1);
            assert!(item.children[0].children.is_empty());

            let reasons: Vec<_> = report.dropped.iter().map(|d| (d.line, d.reason)).collect();
            assert_eq!(
                reasons,
                vec![
                    (2, DropReason::OutsideItem),
                    (5, DropReason::SegmentMismatch),
                    (6, DropReason::OrphanSubItem),
                    (7, DropReason::Unrecognized),
                    (8, DropReason::MalformedHeader),
                ]
            );
        }

        #[test]
        fn level_two_attaches_to_current_item_regardless_of_prefix() {
            let input = "## 1. Alpha\n\n1. [ ] Item\n    - [ ] 9.1 Mislabelled\n        - [ ] 9.1.1 Child\n";
            let outline = parse_outline(input);
            let item = &outline.sections[0].items[0];
            assert_eq!(item.children[0].text, "Mislabelled");
            assert_eq!(item.children[0].children[0].text, "Child");
        }

        #[test]
        fn sections_differing_only_in_case_are_reported() {
            let input = "## 1. Work\n\n1. [ ] a\n\n## 2. work\n\n2. [ ] b\n";
            let (outline, report) = parse_outline_with_report(input);
            assert_eq!(outline.sections.len(), 2);
            assert!(report.dropped.is_empty());
            assert!(!report.is_clean());
            assert_eq!(
                report.shadowed_sections,
                vec![ShadowedSection {
                    line: 5,
                    name: "work".into(),
                    shadowed_by: "Work".into(),
                }]
            );
        }

        #[test]
        fn crlf_input_is_accepted() {
            let outline = parse_outline("## 1. Alpha\r\n\r\n1. [ ] Task\r\n    - [x] 1.1 Sub\r\n");
            let item = &outline.sections[0].items[0];
            assert_eq!(item.text, "Task");
            assert_eq!(item.children[0].text, "Sub");
        }

        #[test]
        fn non_utf8_bytes_fail() {
            assert!(matches!(
                parse_outline_bytes(&[0x23, 0xff, 0xfe]),
                Err(ParseError::InvalidUtf8(_))
            ));
            let outline = parse_outline_bytes(b"## 1. A\n\n1. [ ] a\n").expect("utf-8");
            assert_eq!(outline.item_count(), 1);
        }
    }
}

pub mod numbering {
    //! Positional numbering: the only place numbers come from.
    //!
    //! A main item's number is its position across all sections concatenated; a
    //! sub-item's number is its parent's number followed by its 1-based position among
    //! siblings. Nothing else assigns or stores numbers.

    use crate::core::*;
    use crate::lookup::Location;

    /// A node paired with its computed position.
    #[derive(Debug, Clone)]
    pub struct Numbered<'a> {
        /// 0-based section index.
        pub section: usize,
        pub path: NodePath,
        pub task: &'a Task,
    }

    impl Numbered<'_> {
        pub fn level(&self) -> u8 {
            self.path.level()
        }
    }

    impl Outline {
        /// Count of main items in the sections before `section`.
        pub fn item_offset(&self, section: usize) -> usize {
            self.sections
                .iter()
                .take(section)
                .map(|s| s.items.len())
                .sum()
        }

        /// Global number of the main item at `index` within `section`.
        pub fn item_number(&self, section: usize, index: usize) -> usize {
            self.item_offset(section) + index + 1
        }

        /// Dotted path of the node at `location`.
        pub fn path_of(&self, location: &Location) -> NodePath {
            let mut path = NodePath::item(self.item_number(location.section, location.index));
            for &i in &location.trail {
                path = path.child(i + 1);
            }
            path
        }
    }

    /// Visits every node of every section in document order, depth first. Returning
    /// `false` from `visit` skips that node's children.
    pub fn walk<'a>(outline: &'a Outline, mut visit: impl FnMut(&Numbered<'a>) -> bool) {
        for section in 0..outline.sections.len() {
            walk_section(outline, section, &mut visit);
        }
    }

    /// Same as `walk`, restricted to one section (0-based).
    pub fn walk_section<'a>(
        outline: &'a Outline,
        section: usize,
        mut visit: impl FnMut(&Numbered<'a>) -> bool,
    ) {
        let Some(current) = outline.sections.get(section) else {
            return;
        };
        let offset = outline.item_offset(section);
        for (i, item) in current.items.iter().enumerate() {
            walk_task(section, NodePath::item(offset + i + 1), item, &mut visit);
        }
    }

    fn walk_task<'a, F>(section: usize, path: NodePath, task: &'a Task, visit: &mut F)
    where
        F: FnMut(&Numbered<'a>) -> bool,
    {
        let node = Numbered {
            section,
            path,
            task,
        };
        if !visit(&node) {
            return;
        }
        for (i, child) in task.children.iter().enumerate() {
            walk_task(section, node.path.child(i + 1), child, visit);
        }
    }

}

pub mod format {
    use crate::core::*;
    use crate::numbering::{Numbered, walk_section};

    /// Serializes an outline to canonical text, renumbering everything from position.
    ///
    /// Output: preamble, a blank line, then per section a `## <n>. <name>` header, a
    /// blank line, its items and sub-items, and a blank line. Trailing blank lines are
    /// trimmed and the text ends with a single newline.
    pub fn format_outline(outline: &Outline) -> String {
        let mut lines: Vec<String> = outline.preamble.clone();
        if !lines.is_empty() {
            lines.push(String::new());
        }

        for (idx, section) in outline.sections.iter().enumerate() {
            lines.push(format!("## {}. {}", idx + 1, section.name));
            lines.push(String::new());
            walk_section(outline, idx, |node| {
                lines.push(render_line(node));
                node.level() < MAX_DEPTH
            });
            lines.push(String::new());
        }

        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        if lines.is_empty() {
            return String::new();
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    fn render_line(node: &Numbered<'_>) -> String {
        let mark = if node.task.completed { 'x' } else { ' ' };
        if node.path.is_item() {
            format!("{}. [{}] {}", node.path, mark, node.task.text)
        } else {
            format!(
                "{}- [{}] {} {}",
                indent_for(node.level()),
                mark,
                node.path,
                node.task.text
            )
        }
    }

}

pub mod ops {
    //! Mutation engine.
    //!
    //! Every operation validates against the structural invariants before touching the
    //! tree, so a failed call leaves the outline exactly as it was. Batch operations are
    //! sequences of independent steps and report one outcome per id; a failing step does
    //! not undo the ones before it.

    use crate::core::*;
    use crate::lookup::Location;
    use tracing::debug;

    /// Per-key outcome of a batch operation, in input order. Keys are item numbers for
    /// completion and removal, texts for additions.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct BatchOutcome<K = usize, T = ()> {
        pub outcomes: Vec<(K, Result<T, OutlineError>)>,
    }

    impl<K: Clone, T> BatchOutcome<K, T> {
        pub fn succeeded(&self) -> Vec<K> {
            self.outcomes
                .iter()
                .filter(|(_, r)| r.is_ok())
                .map(|(k, _)| k.clone())
                .collect()
        }

        pub fn failed(&self) -> Vec<(K, &OutlineError)> {
            self.outcomes
                .iter()
                .filter_map(|(k, r)| r.as_ref().err().map(|e| (k.clone(), e)))
                .collect()
        }

        /// Values produced by the successful steps.
        pub fn values(&self) -> Vec<&T> {
            self.outcomes
                .iter()
                .filter_map(|(_, r)| r.as_ref().ok())
                .collect()
        }

        pub fn any_succeeded(&self) -> bool {
            self.outcomes.iter().any(|(_, r)| r.is_ok())
        }
    }

    fn check_line(text: &str, what: &str) -> Result<(), OutlineError> {
        if text.trim().is_empty() || text.contains(['\n', '\r']) {
            return Err(OutlineError::InvalidText(what.to_string()));
        }
        Ok(())
    }

    fn missing(path: &NodePath) -> OutlineError {
        if path.is_item() {
            OutlineError::NotFound(format!("item {path}"))
        } else {
            OutlineError::NotFound(format!("sub-item {path}"))
        }
    }

    fn missing_item(number: usize) -> OutlineError {
        OutlineError::NotFound(format!("item {number}"))
    }

    fn missing_section(name: &str) -> OutlineError {
        OutlineError::SectionNotFound(name.to_string())
    }

    impl Outline {
        /* ------------------------------ Completion ------------------------------ */

        /// Sets the completion flag of a main item (`"3"`) or sub-item (`"3.1"`).
        pub fn set_completed(&mut self, path: &NodePath, completed: bool) -> Result<(), OutlineError> {
            let task = self.find_mut(path).ok_or_else(|| missing(path))?;
            task.completed = completed;
            debug!(%path, completed, "set completion");
            Ok(())
        }

        pub fn complete(&mut self, path: &NodePath) -> Result<(), OutlineError> {
            self.set_completed(path, true)
        }

        pub fn uncomplete(&mut self, path: &NodePath) -> Result<(), OutlineError> {
            self.set_completed(path, false)
        }

        pub fn complete_item(&mut self, number: usize) -> Result<(), OutlineError> {
            self.complete(&NodePath::item(number))
        }

        pub fn uncomplete_item(&mut self, number: usize) -> Result<(), OutlineError> {
            self.uncomplete(&NodePath::item(number))
        }

        pub fn complete_items(&mut self, numbers: &[usize]) -> BatchOutcome {
            let outcomes = numbers
                .iter()
                .map(|&n| (n, self.complete_item(n)))
                .collect();
            BatchOutcome { outcomes }
        }

        /* ------------------------------ Main items ------------------------------ */

        /// Appends a main item to `section`; returns the number it will carry.
        pub fn add_item(
            &mut self,
            text: &str,
            section: &str,
            completed: bool,
        ) -> Result<usize, OutlineError> {
            check_line(text, "item text")?;
            let s = self
                .section_index(section)
                .ok_or_else(|| missing_section(section))?;
            self.sections[s].items.push(Task::item(text, completed));
            let number = self.item_number(s, self.sections[s].items.len() - 1);
            debug!(number, section = %self.sections[s].name, "added item");
            Ok(number)
        }

        /// Appends several main items to `section`, one independent step per text. A
        /// missing section fails the whole call before anything is added; an invalid
        /// text fails only its own step.
        pub fn add_items<S: AsRef<str>>(
            &mut self,
            texts: &[S],
            section: &str,
            completed: bool,
        ) -> Result<BatchOutcome<String, usize>, OutlineError> {
            if self.section_index(section).is_none() {
                return Err(missing_section(section));
            }
            let outcomes = texts
                .iter()
                .map(|text| {
                    let text = text.as_ref();
                    (text.to_string(), self.add_item(text, section, completed))
                })
                .collect();
            Ok(BatchOutcome { outcomes })
        }

        /// Removes a main item with its whole subtree.
        pub fn remove_item(&mut self, number: usize) -> Result<Task, OutlineError> {
            let (s, i) = self.locate_item(number).ok_or_else(|| missing_item(number))?;
            let removed = self.sections[s].items.remove(i);
            debug!(number, "removed item");
            Ok(removed)
        }

        /// Removes several main items. Numbers refer to the numbering before the batch;
        /// a number repeated in the batch fails on its second occurrence.
        pub fn remove_items(&mut self, numbers: &[usize]) -> BatchOutcome {
            let mut targets: Vec<(usize, usize)> = Vec::new();
            let mut outcomes = Vec::with_capacity(numbers.len());
            for &n in numbers {
                match self.locate_item(n) {
                    Some(slot) if !targets.contains(&slot) => {
                        targets.push(slot);
                        outcomes.push((n, Ok(())));
                    }
                    _ => outcomes.push((n, Err(missing_item(n)))),
                }
            }

            targets.sort_unstable_by(|a, b| b.cmp(a));
            for (s, i) in targets {
                self.sections[s].items.remove(i);
            }
            debug!(requested = numbers.len(), "removed items");
            BatchOutcome { outcomes }
        }

        /// Moves a main item to the end of `target`; returns its new number.
        pub fn move_item(&mut self, number: usize, target: &str) -> Result<usize, OutlineError> {
            let (s, i) = self.locate_item(number).ok_or_else(|| missing_item(number))?;
            let t = self
                .section_index(target)
                .ok_or_else(|| missing_section(target))?;
            let task = self.sections[s].items.remove(i);
            self.sections[t].items.push(task);
            let new_number = self.item_number(t, self.sections[t].items.len() - 1);
            debug!(from = number, to = new_number, section = %self.sections[t].name, "moved item");
            Ok(new_number)
        }

        /// Exchanges two main items' slots. Across sections, each item takes over the
        /// other's section membership.
        pub fn swap_items(&mut self, first: usize, second: usize) -> Result<(), OutlineError> {
            let a = self.locate_item(first).ok_or_else(|| missing_item(first))?;
            let b = self.locate_item(second).ok_or_else(|| missing_item(second))?;
            if a.0 == b.0 {
                self.sections[a.0].items.swap(a.1, b.1);
            } else {
                let (lo, hi) = if a.0 < b.0 { (a, b) } else { (b, a) };
                let (head, tail) = self.sections.split_at_mut(hi.0);
                std::mem::swap(&mut head[lo.0].items[lo.1], &mut tail[0].items[hi.1]);
            }
            debug!(first, second, "swapped items");
            Ok(())
        }

        /// Moves a main item so that it ends up with global number `position`.
        pub fn move_to_position(&mut self, number: usize, position: usize) -> Result<(), OutlineError> {
            let (s, i) = self.locate_item(number).ok_or_else(|| missing_item(number))?;
            let total = self.item_count();
            if position < 1 || position > total {
                return Err(OutlineError::InvalidPosition { position, total });
            }
            let task = self.sections[s].items.remove(i);
            let (ts, ti) = self.insertion_slot(position);
            self.sections[ts].items.insert(ti, task);
            debug!(number, position, "moved item to position");
            Ok(())
        }

        /// Section and index at which an inserted item gets global number `position`.
        /// A position right after a section's last item appends to that section.
        fn insertion_slot(&self, position: usize) -> (usize, usize) {
            let mut start = 1;
            for (s, section) in self.sections.iter().enumerate() {
                let end = start + section.items.len();
                if position < end {
                    return (s, position - start);
                }
                if position == end {
                    return (s, section.items.len());
                }
                start = end;
            }
            let last = self.sections.len().saturating_sub(1);
            (last, self.sections.get(last).map_or(0, |s| s.items.len()))
        }

        /* ------------------------------ Sub-items ------------------------------ */

        /// Appends a sub-item under a main item or sub-item; returns its path.
        pub fn add_sub_item(
            &mut self,
            parent: &NodePath,
            text: &str,
            completed: bool,
        ) -> Result<NodePath, OutlineError> {
            check_line(text, "sub-item text")?;
            let location = self.locate(parent).ok_or_else(|| missing(parent))?;
            let level = location.level();
            if level >= MAX_DEPTH {
                return Err(OutlineError::DepthExceeded(format!("a child of {parent}")));
            }
            let node = self.task_mut(&location).ok_or_else(|| missing(parent))?;
            node.children.push(Task::sub_item(level + 1, text, completed));
            let path = parent.child(node.children.len());
            debug!(%path, "added sub-item");
            Ok(path)
        }

        fn locate_sub_item(&self, path: &NodePath) -> Result<Location, OutlineError> {
            if path.is_item() {
                return Err(missing(path));
            }
            self.locate(path).ok_or_else(|| missing(path))
        }

        fn detach(&mut self, location: &Location) -> Option<Task> {
            let &index = location.trail.last()?;
            let siblings = self.container_mut(location)?;
            (index < siblings.len()).then(|| siblings.remove(index))
        }

        /// Reattaches the subtree at `path` as the last child of `new_parent`, re-levelling
        /// every node in it. Returns the moved node's new path.
        pub fn move_sub_item(
            &mut self,
            path: &NodePath,
            new_parent: &NodePath,
        ) -> Result<NodePath, OutlineError> {
            let source = self.locate_sub_item(path)?;
            let target = self.locate(new_parent).ok_or_else(|| missing(new_parent))?;
            if target.level() >= MAX_DEPTH {
                return Err(OutlineError::DepthExceeded(format!("a child of {new_parent}")));
            }
            if source.contains(&target) {
                return Err(OutlineError::InvalidTarget(format!(
                    "{path} cannot be moved under {new_parent}, which is inside it"
                )));
            }
            let height = self.task(&source).map_or(1, Task::height);
            if target.level() + height > MAX_DEPTH {
                return Err(OutlineError::DepthExceeded(format!(
                    "{path} moved under {new_parent}"
                )));
            }

            let mut subtree = self.detach(&source).ok_or_else(|| missing(path))?;
            let target = target.after_removal_of(&source);
            subtree.retag(target.level() + 1);
            let parent = self.task_mut(&target).ok_or_else(|| missing(new_parent))?;
            parent.children.push(subtree);
            let position = parent.children.len();
            let moved = self.path_of(&target).child(position);
            debug!(from = %path, to = %moved, "moved sub-item");
            Ok(moved)
        }

        /// Exchanges two sub-items' slots. Each subtree is re-levelled to its new depth.
        pub fn swap_sub_items(&mut self, first: &NodePath, second: &NodePath) -> Result<(), OutlineError> {
            let a = self.locate_sub_item(first)?;
            let b = self.locate_sub_item(second)?;
            if a == b {
                return Ok(());
            }
            if a.contains(&b) || b.contains(&a) {
                return Err(OutlineError::InvalidTarget(format!(
                    "{first} and {second} are nested inside one another"
                )));
            }
            let a_height = self.task(&a).map_or(1, Task::height);
            let b_height = self.task(&b).map_or(1, Task::height);
            if a.level() + b_height - 1 > MAX_DEPTH {
                return Err(OutlineError::DepthExceeded(format!("{second} moved to {first}")));
            }
            if b.level() + a_height - 1 > MAX_DEPTH {
                return Err(OutlineError::DepthExceeded(format!("{first} moved to {second}")));
            }

            let mut left = std::mem::take(self.task_mut(&a).ok_or_else(|| missing(first))?);
            left.retag(b.level());
            let slot = self.task_mut(&b).ok_or_else(|| missing(second))?;
            let mut right = std::mem::replace(slot, left);
            right.retag(a.level());
            if let Some(slot) = self.task_mut(&a) {
                *slot = right;
            }
            debug!(%first, %second, "swapped sub-items");
            Ok(())
        }

        /// Moves a sub-item up one level, to the end of its grandparent's children.
        pub fn promote_sub_item(&mut self, path: &NodePath) -> Result<NodePath, OutlineError> {
            if path.is_item() {
                return Err(missing(path));
            }
            let grandparent = path
                .parent()
                .and_then(|p| p.parent())
                .ok_or_else(|| OutlineError::AlreadyAtMinDepth(path.to_string()))?;
            self.move_sub_item(path, &grandparent)
        }

        /// Moves a sub-item one level down, under `sibling`, which must sit at the same level.
        pub fn demote_sub_item(
            &mut self,
            path: &NodePath,
            sibling: &NodePath,
        ) -> Result<NodePath, OutlineError> {
            if path.is_item() {
                return Err(missing(path));
            }
            if path.level() >= MAX_DEPTH {
                return Err(OutlineError::DepthExceeded(path.to_string()));
            }
            if sibling.level() != path.level() {
                return Err(OutlineError::LevelMismatch {
                    target: sibling.to_string(),
                    expected: path.level(),
                    found: sibling.level(),
                });
            }
            if self.find(sibling).is_none() {
                return Err(missing(sibling));
            }
            self.move_sub_item(path, sibling)
        }

        /* ------------------------------ Sections ------------------------------ */

        /// Appends an empty section; returns its 1-based number.
        pub fn new_section(&mut self, name: &str) -> Result<usize, OutlineError> {
            check_line(name, "section name")?;
            if self.section_index(name).is_some() {
                return Err(OutlineError::DuplicateSection(name.to_string()));
            }
            self.sections.push(Section::new(name));
            debug!(section = name, "created section");
            Ok(self.sections.len())
        }

        /// Removes a section together with all of its items.
        pub fn remove_section(&mut self, name: &str) -> Result<Section, OutlineError> {
            let s = self.section_index(name).ok_or_else(|| missing_section(name))?;
            let removed = self.sections.remove(s);
            debug!(section = %removed.name, items = removed.items.len(), "removed section");
            Ok(removed)
        }

        /// Appends all of `source`'s items to `target` and deletes `source`. Returns the
        /// number of items moved.
        pub fn merge_sections(&mut self, source: &str, target: &str) -> Result<usize, OutlineError> {
            let s = self.section_index(source).ok_or_else(|| missing_section(source))?;
            let t = self.section_index(target).ok_or_else(|| missing_section(target))?;
            if s == t {
                return Err(OutlineError::InvalidTarget(format!(
                    "section '{source}' cannot be merged into itself"
                )));
            }
            let merged = self.sections.remove(s);
            let t = if s < t { t - 1 } else { t };
            let moved = merged.items.len();
            self.sections[t].items.extend(merged.items);
            debug!(source = %merged.name, target = %self.sections[t].name, moved, "merged sections");
            Ok(moved)
        }
    }
}

pub mod projectors {
    pub mod listing {
        //! Flat, numbered views of sections for display.

        use crate::core::*;
        use crate::numbering::walk_section;
        use serde::Serialize;
        use serde_with::{DisplayFromStr, serde_as};

        /// One line of a listing.
        #[serde_as]
        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct Entry {
            #[serde_as(as = "DisplayFromStr")]
            pub path: NodePath,
            pub level: u8,
            pub completed: bool,
            pub text: String,
        }

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct SectionListing {
            /// 1-based section number.
            pub index: usize,
            pub name: String,
            pub entries: Vec<Entry>,
        }

        impl SectionListing {
            /// Number of main items in the listing.
            pub fn item_count(&self) -> usize {
                self.entries.iter().filter(|e| e.path.is_item()).count()
            }
        }

        fn project(outline: &Outline, section: usize, only_incomplete: bool) -> SectionListing {
            let mut entries = Vec::new();
            walk_section(outline, section, |node| {
                if only_incomplete && node.task.completed {
                    return false;
                }
                entries.push(Entry {
                    path: node.path.clone(),
                    level: node.level(),
                    completed: node.task.completed,
                    text: node.task.text.clone(),
                });
                true
            });
            SectionListing {
                index: section + 1,
                name: outline.sections[section].name.clone(),
                entries,
            }
        }

        /// Entries of one section in document order. With `only_incomplete`, completed
        /// nodes are skipped together with everything below them.
        pub fn section_entries(
            outline: &Outline,
            section: &str,
            only_incomplete: bool,
        ) -> Result<SectionListing, OutlineError> {
            let idx = outline
                .section_index(section)
                .ok_or_else(|| OutlineError::SectionNotFound(section.to_string()))?;
            Ok(project(outline, idx, only_incomplete))
        }

        /// Entries of every section. With `only_incomplete`, sections left without a
        /// main item are omitted.
        pub fn all_entries(outline: &Outline, only_incomplete: bool) -> Vec<SectionListing> {
            (0..outline.sections.len())
                .map(|idx| project(outline, idx, only_incomplete))
                .filter(|listing| !only_incomplete || listing.item_count() > 0)
                .collect()
        }

    }

    pub mod summary {
        use crate::core::Outline;
        use serde::Serialize;

        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct SectionSummary {
            pub index: usize,
            pub name: String,
            pub items: usize,
        }

        /// One row per section: its number, name and main item count.
        pub fn sections(outline: &Outline) -> Vec<SectionSummary> {
            outline
                .sections
                .iter()
                .enumerate()
                .map(|(i, s)| SectionSummary {
                    index: i + 1,
                    name: s.name.clone(),
                    items: s.items.len(),
                })
                .collect()
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::parser::parse_outline;

            #[test]
            fn counts_main_items_only() {
                let outline = parse_outline(
                    "## 1. A\n\n1. [ ] a\n    - [ ] 1.1 sub\n2. [x] b\n\n## 2. Empty\n",
                );
                let rows = sections(&outline);
                assert_eq!(
                    rows,
                    vec![
                        SectionSummary { index: 1, name: "A".into(), items: 2 },
                        SectionSummary { index: 2, name: "Empty".into(), items: 0 },
                    ]
                );
            }
        }
    }

    pub mod stats {
        //! Completion statistics.

        use crate::core::*;
        use indexmap::IndexMap;
        use serde::Serialize;

        #[derive(Debug, Clone, Default, PartialEq, Serialize)]
        pub struct SectionCounts {
            pub items: usize,
            pub completed: usize,
        }

        #[derive(Debug, Clone, Default, PartialEq, Serialize)]
        pub struct Stats {
            pub total_items: usize,
            pub completed_items: usize,
            pub remaining_items: usize,
            pub total_sub_items: usize,
            pub completed_sub_items: usize,
            pub sections: usize,
            /// Percentage of completed main items; `None` without any items.
            pub progress: Option<f64>,
            /// Keyed by section name, in document order.
            pub per_section: IndexMap<String, SectionCounts>,
        }

        fn count_sub_items(task: &Task, total: &mut usize, completed: &mut usize) {
            for child in &task.children {
                *total += 1;
                if child.completed {
                    *completed += 1;
                }
                count_sub_items(child, total, completed);
            }
        }

        pub fn compute(outline: &Outline) -> Stats {
            let mut stats = Stats {
                sections: outline.sections.len(),
                ..Stats::default()
            };
            for section in &outline.sections {
                let counts = stats.per_section.entry(section.name.clone()).or_default();
                for item in &section.items {
                    counts.items += 1;
                    stats.total_items += 1;
                    if item.completed {
                        counts.completed += 1;
                        stats.completed_items += 1;
                    }
                    count_sub_items(
                        item,
                        &mut stats.total_sub_items,
                        &mut stats.completed_sub_items,
                    );
                }
            }
            stats.remaining_items = stats.total_items - stats.completed_items;
            if stats.total_items > 0 {
                stats.progress =
                    Some(stats.completed_items as f64 / stats.total_items as f64 * 100.0);
            }
            stats
        }

        #[cfg(test)]
        mod tests {
            use super::*;
            use crate::parser::parse_outline;

            #[test]
            fn counts_items_and_sub_items() {
                let outline = parse_outline(
                    "## 1. A\n\n1. [x] a\n    - [x] 1.1 s\n        - [ ] 1.1.1 t\n2. [ ] b\n\n## 2. B\n\n3. [ ] c\n4. [x] d\n",
                );
                let stats = compute(&outline);
                assert_eq!(stats.total_items, 4);
                assert_eq!(stats.completed_items, 2);
                assert_eq!(stats.remaining_items, 2);
                assert_eq!(stats.total_sub_items, 2);
                assert_eq!(stats.completed_sub_items, 1);
                assert_eq!(stats.sections, 2);
                assert_eq!(stats.progress, Some(50.0));
                assert_eq!(
                    stats.per_section.get("B"),
                    Some(&SectionCounts { items: 2, completed: 1 })
                );
                let keys: Vec<_> = stats.per_section.keys().cloned().collect();
                assert_eq!(keys, vec!["A", "B"]);
            }

            #[test]
            fn empty_outline_has_no_progress() {
                let stats = compute(&Outline::new());
                assert_eq!(stats.total_items, 0);
                assert_eq!(stats.progress, None);
                assert!(stats.per_section.is_empty());
            }
        }
    }
}

pub mod storage {
    //! Where outlines come from and go to. The core never touches the filesystem;
    //! callers load through an `OutlineStore`, mutate, and save.

    use crate::core::Outline;
    use crate::format::format_outline;
    use crate::parser::{ParseReport, decode, parse_outline_with_report};
    use anyhow::{Context, Result};
    use std::cell::RefCell;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tracing::{debug, warn};

    pub trait OutlineStore {
        /// Load and parse, returning the lines the parser dropped as well.
        fn load_with_report(&self) -> Result<(Outline, ParseReport)>;

        /// Persist the canonical serialization of `outline`.
        fn save(&self, outline: &Outline) -> Result<()>;

        fn load(&self) -> Result<Outline> {
            let (outline, report) = self.load_with_report()?;
            if !report.dropped.is_empty() {
                warn!(dropped = report.dropped.len(), "ignored malformed lines");
            }
            Ok(outline)
        }
    }

    /// Outline document on disk.
    #[derive(Debug, Clone)]
    pub struct FileStore {
        path: PathBuf,
    }

    impl FileStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl OutlineStore for FileStore {
        fn load_with_report(&self) -> Result<(Outline, ParseReport)> {
            let bytes = fs::read(&self.path).with_context(|| format!("reading {:?}", self.path))?;
            let text = decode(&bytes).with_context(|| format!("decoding {:?}", self.path))?;
            let (outline, report) = parse_outline_with_report(text);
            debug!(
                path = ?self.path,
                sections = outline.sections.len(),
                items = outline.item_count(),
                "loaded outline"
            );
            Ok((outline, report))
        }

        fn save(&self, outline: &Outline) -> Result<()> {
            fs::write(&self.path, format_outline(outline))
                .with_context(|| format!("writing {:?}", self.path))?;
            debug!(path = ?self.path, "saved outline");
            Ok(())
        }
    }

    /// Outline text held in memory.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        text: RefCell<String>,
    }

    impl MemoryStore {
        pub fn new(text: impl Into<String>) -> Self {
            Self {
                text: RefCell::new(text.into()),
            }
        }

        pub fn text(&self) -> String {
            self.text.borrow().clone()
        }
    }

    impl OutlineStore for MemoryStore {
        fn load_with_report(&self) -> Result<(Outline, ParseReport)> {
            Ok(parse_outline_with_report(&self.text.borrow()))
        }

        fn save(&self, outline: &Outline) -> Result<()> {
            *self.text.borrow_mut() = format_outline(outline);
            Ok(())
        }
    }

}

pub use crate::core::{NodePath, Outline, OutlineError, Section, Task};
pub use format::format_outline;
pub use ops::BatchOutcome;
pub use parser::{ParseReport, parse_outline, parse_outline_bytes, parse_outline_with_report};
pub use storage::{FileStore, MemoryStore, OutlineStore};
