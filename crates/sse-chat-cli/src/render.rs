/// Tracks how much of the accumulated reply is already on screen, so each
/// chunk prints only what it added.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    printed: usize,
}

impl ReplyPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The part of `text` not printed yet. `text` only ever grows by appending.
    pub fn next_piece<'a>(&mut self, text: &'a str) -> &'a str {
        match text.get(self.printed..) {
            Some(piece) => {
                self.printed = text.len();
                piece
            }
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prints_only_new_text() {
        let mut printer = ReplyPrinter::new();
        assert_eq!(printer.next_piece("你"), "你");
        assert_eq!(printer.next_piece("你好"), "好");
        assert_eq!(printer.next_piece("你好"), "");
        assert_eq!(printer.next_piece("你好！\n[error 429: slow down]"), "！\n[error 429: slow down]");
    }

    #[test]
    fn test_shorter_text_prints_nothing() {
        let mut printer = ReplyPrinter::new();
        printer.next_piece("hello");
        assert_eq!(printer.next_piece("he"), "");
    }
}
