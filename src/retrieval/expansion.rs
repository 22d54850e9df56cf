//! Keyword synonym expansion for single-query retrieval.
//!
//! E.g., "faute" → "faute sanction".

/// Refereeing vocabulary: trigger keyword and related terms, most useful first
const SYNONYMS: &[(&str, &[&str])] = &[
    ("point", &["point", "score", "marquage"]),
    ("faute", &["faute", "sanction", "pénalité", "infraction"]),
    ("ko", &["ko", "knock-out", "mise hors de combat"]),
    ("coup", &["coup", "technique", "frappe", "attaque"]),
    ("protection", &["protection", "équipement", "casque", "gants"]),
    ("arbitre", &["arbitre", "officiel", "jugement"]),
];

/// Related terms appended per matched keyword
const MAX_TERMS_PER_KEYWORD: usize = 2;

/// Expand a query with domain synonyms.
///
/// Keywords match anywhere in the lowercased query, so "points" triggers
/// "point". Returns the query unchanged when nothing matches.
pub fn expand_query(query: &str) -> String {
    let lower = query.to_lowercase();

    let terms: Vec<&str> = SYNONYMS
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .flat_map(|(_, synonyms)| synonyms.iter().take(MAX_TERMS_PER_KEYWORD).copied())
        .collect();

    if terms.is_empty() {
        return query.to_string();
    }

    let expanded = format!("{} {}", query, terms.join(" "));
    tracing::debug!("Expanded query: {}", expanded);
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_matched_keywords() {
        assert_eq!(
            expand_query("Quelle Faute entraîne une disqualification ?"),
            "Quelle Faute entraîne une disqualification ? faute sanction"
        );
    }

    #[test]
    fn test_multiple_keywords_in_table_order() {
        assert_eq!(
            expand_query("Un coup après le KO"),
            "Un coup après le KO ko knock-out coup technique"
        );
    }

    #[test]
    fn test_substring_match() {
        assert_eq!(
            expand_query("Comment sont attribués les points ?"),
            "Comment sont attribués les points ? point score"
        );
    }

    #[test]
    fn test_no_match_unchanged() {
        let query = "Durée d'un round";
        assert_eq!(expand_query(query), query);
    }
}
