/// Cursor selection over the buffer text, as byte offsets.
///
/// Invariant: `0 <= start <= end <= text.len()`, both on char boundaries.
/// A collapsed selection (`start == end`) is a plain cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub const fn collapsed(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub const fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// The secondary markdown-editing surface's mutable text state.
///
/// Every operation is a pure text transform over `(text, selection)`; there
/// is no hidden state and nothing here touches the conversation until the
/// surface commits the result through an explicit edit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EditorBuffer {
    text: String,
    selection: Selection,
}

impl EditorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from existing text with the cursor at the end.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let selection = Selection::collapsed(text.len());
        Self { text, selection }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Replaces the whole text (typing in the surface); the selection
    /// collapses to the end.
    pub fn replace_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.selection = Selection::collapsed(self.text.len());
    }

    /// Moves the selection, clamping to bounds and snapping each offset back
    /// to the nearest char boundary at or before it.
    pub fn set_selection(&mut self, start: usize, end: usize) {
        let start = self.snap_to_char_boundary(start.min(self.text.len()));
        let end = self.snap_to_char_boundary(end.min(self.text.len()));
        self.selection = Selection {
            start: start.min(end),
            end: start.max(end),
        };
    }

    /// Frames the selected span with `prefix` and `suffix`.
    ///
    /// The new selection covers the original span, now shifted past the
    /// prefix, so repeated formatting re-wraps the same content predictably.
    pub fn wrap_selection(&mut self, prefix: &str, suffix: &str) {
        let Selection { start, end } = self.selection;

        let mut next =
            String::with_capacity(self.text.len() + prefix.len() + suffix.len());
        next.push_str(&self.text[..start]);
        next.push_str(prefix);
        next.push_str(&self.text[start..end]);
        next.push_str(suffix);
        next.push_str(&self.text[end..]);

        self.text = next;
        self.selection = Selection {
            start: start + prefix.len(),
            end: end + prefix.len(),
        };
    }

    /// Inserts content at the selection start; with a collapsed selection
    /// this is plain insertion at the cursor.
    pub fn insert_at_cursor(&mut self, content: &str) {
        self.wrap_selection(content, "");
    }

    /// Inserts a line marker (heading, list bullet) at the selection start
    /// regardless of selection width; the selected span stays selected.
    pub fn prefix_line(&mut self, marker: &str) {
        self.wrap_selection(marker, "");
    }

    fn snap_to_char_boundary(&self, mut offset: usize) -> usize {
        while offset > 0 && !self.text.is_char_boundary(offset) {
            offset -= 1;
        }
        offset
    }
}

/// Toolbar formatting operations with the markdown marker table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownFormat {
    Bold,
    Italic,
    Heading,
    List,
    InlineCode,
    CodeBlock,
    Link,
}

impl MarkdownFormat {
    pub fn apply(self, buffer: &mut EditorBuffer) {
        match self {
            Self::Bold => buffer.wrap_selection("**", "**"),
            Self::Italic => buffer.wrap_selection("*", "*"),
            Self::Heading => buffer.prefix_line("### "),
            Self::List => buffer.prefix_line("- "),
            Self::InlineCode => buffer.wrap_selection("`", "`"),
            Self::CodeBlock => buffer.wrap_selection("```\n", "\n```"),
            Self::Link => buffer.wrap_selection("[", "](url)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_selection_frames_the_span_and_reselects_it() {
        let mut buffer = EditorBuffer::from_text("hello world");
        buffer.set_selection(0, 5);

        buffer.wrap_selection("**", "**");

        assert_eq!(buffer.text(), "**hello** world");
        assert_eq!(buffer.selection(), Selection { start: 2, end: 7 });
        assert_eq!(&buffer.text()[2..7], "hello");
    }

    #[test]
    fn repeated_wrap_re_wraps_the_same_span() {
        let mut buffer = EditorBuffer::from_text("hello world");
        buffer.set_selection(0, 5);

        buffer.wrap_selection("**", "**");
        buffer.wrap_selection("*", "*");

        assert_eq!(buffer.text(), "***hello*** world");
        assert_eq!(&buffer.text()[buffer.selection().start..buffer.selection().end], "hello");
    }

    #[test]
    fn insert_at_cursor_with_collapsed_selection_is_plain_insertion() {
        let mut buffer = EditorBuffer::from_text("ab");
        buffer.set_selection(1, 1);

        buffer.insert_at_cursor("X");

        assert_eq!(buffer.text(), "aXb");
        assert_eq!(buffer.selection(), Selection::collapsed(2));
    }

    #[test]
    fn prefix_line_keeps_a_wide_selection_selected() {
        let mut buffer = EditorBuffer::from_text("item one");
        buffer.set_selection(0, 4);

        buffer.prefix_line("- ");

        assert_eq!(buffer.text(), "- item one");
        assert_eq!(&buffer.text()[buffer.selection().start..buffer.selection().end], "item");
    }

    #[test]
    fn code_block_format_wraps_with_fenced_lines() {
        let mut buffer = EditorBuffer::from_text("let x = 1;");
        buffer.set_selection(0, buffer.text().len());

        MarkdownFormat::CodeBlock.apply(&mut buffer);

        assert_eq!(buffer.text(), "```\nlet x = 1;\n```");
    }

    #[test]
    fn link_format_appends_the_url_placeholder() {
        let mut buffer = EditorBuffer::from_text("docs");
        buffer.set_selection(0, 4);

        MarkdownFormat::Link.apply(&mut buffer);

        assert_eq!(buffer.text(), "[docs](url)");
        assert_eq!(buffer.selection(), Selection { start: 1, end: 5 });
    }

    #[test]
    fn set_selection_clamps_out_of_range_offsets() {
        let mut buffer = EditorBuffer::from_text("abc");
        buffer.set_selection(10, 50);
        assert_eq!(buffer.selection(), Selection::collapsed(3));

        buffer.set_selection(2, 1);
        assert_eq!(buffer.selection(), Selection { start: 1, end: 2 });
    }

    #[test]
    fn set_selection_snaps_inside_multibyte_chars_to_a_boundary() {
        // "é" is two bytes, so offset 1 is not a char boundary.
        let mut buffer = EditorBuffer::from_text("résumé");
        buffer.set_selection(2, 2);

        buffer.insert_at_cursor("|");
        assert!(buffer.text().starts_with("r"));
        assert!(buffer.text().is_char_boundary(buffer.selection().start));
    }

    #[test]
    fn replace_text_collapses_the_selection_to_the_end() {
        let mut buffer = EditorBuffer::from_text("old");
        buffer.set_selection(0, 3);

        buffer.replace_text("brand new");
        assert_eq!(buffer.selection(), Selection::collapsed(9));
    }
}
