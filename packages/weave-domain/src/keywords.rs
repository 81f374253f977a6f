use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_MAX_KEYWORDS: usize = 8;

const STOPWORDS: &[&str] = &[
	"about", "all", "and", "any", "are", "but", "can", "did", "does", "for", "from", "give", "has",
	"have", "held", "how", "into", "list", "many", "me", "most", "much", "of", "on", "or", "per",
	"please", "show", "than", "that", "the", "their", "them", "there", "these", "this", "those",
	"top", "was", "were", "what", "when", "where", "which", "who", "whose", "why", "with", "year",
	"years",
];

/// Content words of `text`, lowercased and deduplicated in first-seen order.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
	let mut out: Vec<String> = Vec::new();

	for word in text.unicode_words() {
		let lowered = word.to_lowercase();

		if lowered.chars().count() < 3
			|| lowered.chars().all(|c| c.is_ascii_digit())
			|| STOPWORDS.contains(&lowered.as_str())
			|| out.contains(&lowered)
		{
			continue;
		}

		out.push(lowered);

		if out.len() >= max {
			break;
		}
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn drops_stopwords_digits_and_duplicates() {
		let keywords =
			extract_keywords("Which organizations hold the most Battery patents since 2019? Battery!", 8);

		assert_eq!(keywords, vec!["organizations", "hold", "battery", "patents", "since"]);
	}

	#[test]
	fn respects_the_limit() {
		assert_eq!(extract_keywords("alpha beta gamma delta", 2), vec!["alpha", "beta"]);
	}
}
