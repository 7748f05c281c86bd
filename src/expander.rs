use crate::ast::{Fragment, Word};
use crate::environment::Environment;

/// Concatenates the fragments of `word`. Unset variables contribute nothing.
pub fn expand(word: &Word, env: &Environment) -> String {
    let mut out = String::new();
    for fragment in &word.fragments {
        match fragment {
            Fragment::Literal(text) => out.push_str(text),
            Fragment::Variable(name) => {
                if let Some(value) = env.get(name) {
                    out.push_str(&value);
                }
            }
        }
    }
    out
}

pub fn expand_all(words: &[Word], env: &Environment) -> Vec<String> {
    words.iter().map(|w| expand(w, env)).collect()
}
