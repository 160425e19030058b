//! Config-gated text post-processing applied to each decoded segment.

pub fn postprocess(
    text: &str,
    ensure_sentence_starting_uppercase: bool,
    ensure_sentence_ends_with_period: bool,
) -> String {
    let collapsed = collapse_whitespace(text);
    if collapsed.is_empty() {
        return collapsed;
    }

    let mut result = collapsed;

    if ensure_sentence_starting_uppercase {
        result = capitalize_first(&result);
    }

    if ensure_sentence_ends_with_period {
        if let Some(last) = result.chars().last() {
            if last.is_alphanumeric() {
                result.push('.');
            }
        }
    }

    result
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalizes_and_terminates_with_period() {
        let result = postprocess("hello world", true, true);
        assert_eq!(result, "Hello world.");
    }

    #[test]
    fn leaves_existing_punctuation_alone() {
        let result = postprocess("is this working?", true, true);
        assert_eq!(result, "Is this working?");
    }

    #[test]
    fn collapses_runs_of_whitespace() {
        let result = postprocess("hello    world  again", false, false);
        assert_eq!(result, "hello world again");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(postprocess("", true, true), "");
    }
}
