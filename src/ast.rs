/// One piece of a [`Word`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Literal(String),
    /// Reference to an environment variable by name
    Variable(String),
}

/// A token made of literal and variable fragments that expands to one string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word {
    pub fragments: Vec<Fragment>,
}

impl Word {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Word { fragments }
    }

    pub fn literal(text: &str) -> Self {
        Word::new(vec![Fragment::Literal(text.to_string())])
    }

    pub fn variable(name: &str) -> Self {
        Word::new(vec![Fragment::Variable(name.to_string())])
    }

    /// Returns the variable name if this word is exactly one variable reference.
    pub fn as_variable(&self) -> Option<&str> {
        match self.fragments.as_slice() {
            [Fragment::Variable(name)] => Some(name),
            _ => None,
        }
    }

    /// Splits a `NAME=VALUE` word into its name and the fragments of the value.
    ///
    /// The word qualifies when its first fragment is a literal name and the
    /// second is a literal starting with `=`. The text following `=` in that
    /// fragment is the first part of the value.
    pub fn as_assignment(&self) -> Option<(&str, Word)> {
        let [Fragment::Literal(name), Fragment::Literal(eq), rest @ ..] = self.fragments.as_slice()
        else {
            return None;
        };
        let head = eq.strip_prefix('=')?;

        let mut value = Vec::with_capacity(rest.len() + 1);
        if !head.is_empty() {
            value.push(Fragment::Literal(head.to_string()));
        }
        value.extend(rest.iter().cloned());
        Some((name, Word::new(value)))
    }
}

/// How output and error redirection targets are opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IoMode {
    #[default]
    Truncate,
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    pub verb: Word,
    pub params: Vec<Word>,
    pub stdin: Option<Word>,
    pub stdout: Option<Word>,
    pub stderr: Option<Word>,
    pub io_mode: IoMode,
}

impl SimpleCommand {
    pub fn new(verb: Word) -> Self {
        SimpleCommand {
            verb,
            params: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            io_mode: IoMode::Truncate,
        }
    }

    pub fn arg(mut self, word: Word) -> Self {
        self.params.push(word);
        self
    }

    pub fn stdin(mut self, target: Word) -> Self {
        self.stdin = Some(target);
        self
    }

    pub fn stdout(mut self, target: Word) -> Self {
        self.stdout = Some(target);
        self
    }

    pub fn stderr(mut self, target: Word) -> Self {
        self.stderr = Some(target);
        self
    }

    pub fn append(mut self) -> Self {
        self.io_mode = IoMode::Append;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `a ; b`
    Sequential,
    /// `a && b`
    ConditionalZero,
    /// `a || b`
    ConditionalNonzero,
    /// `a & b`
    Parallel,
    /// `a | b`
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandNode {
    Leaf(SimpleCommand),
    Binary {
        op: Operator,
        left: Box<CommandNode>,
        right: Box<CommandNode>,
    },
}

impl CommandNode {
    pub fn binary(op: Operator, left: CommandNode, right: CommandNode) -> Self {
        CommandNode::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl From<SimpleCommand> for CommandNode {
    fn from(cmd: SimpleCommand) -> Self {
        CommandNode::Leaf(cmd)
    }
}
