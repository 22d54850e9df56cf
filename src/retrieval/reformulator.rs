//! LLM-driven query reformulation and decomposition

use crate::llm::{ChatMessage, LanguageModel, LlmError};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// Generated lines shorter than this are treated as noise
const MIN_LINE_CHARS: usize = 10;

/// Leading list markers: "1." "2)" "-" "•" "*"
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:\d+\s*[.)]|[-•*])\s*").expect("list marker pattern is valid"));

const REFORMULATION_SYSTEM_PROMPT: &str =
    "Tu es un expert en arbitrage de Kudo spécialisé dans la reformulation de questions.";

const DECOMPOSITION_SYSTEM_PROMPT: &str = "Tu es un expert en pédagogie de l'arbitrage Kudo.";

fn reformulation_prompt(query: &str, num_variations: usize) -> String {
    format!(
        "Tu es un expert en arbitrage de Kudo. Ta tâche est de reformuler la question suivante \
         pour améliorer la recherche de documents.\n\n\
         Question originale: \"{query}\"\n\n\
         Génère {num_variations} reformulations différentes de cette question qui:\n\
         1. Utilisent des termes techniques spécifiques au Kudo\n\
         2. Sont plus précises et détaillées\n\
         3. Couvrent différents aspects de la question\n\
         4. Utilisent la terminologie officielle d'arbitrage\n\n\
         Format: Une reformulation par ligne, sans numérotation ni tirets.\n\n\
         Reformulations:"
    )
}

fn decomposition_prompt(query: &str) -> String {
    format!(
        "Décompose cette question complexe sur l'arbitrage Kudo en 2-3 sous-questions simples \
         et spécifiques.\n\n\
         Question: \"{query}\"\n\n\
         Chaque sous-question doit:\n\
         - Porter sur un aspect précis de la question\n\
         - Être indépendante et compréhensible seule\n\
         - Utiliser la terminologie Kudo appropriée\n\n\
         Format: Une sous-question par ligne, sans numérotation.\n\n\
         Sous-questions:"
    )
}

/// Split a model reply into cleaned, non-trivial lines
pub fn parse_generated_lines(response: &str) -> Vec<String> {
    response
        .lines()
        .map(|line| LIST_MARKER.replace(line.trim(), "").trim().to_string())
        .filter(|line| line.chars().count() >= MIN_LINE_CHARS)
        .collect()
}

/// Case-insensitive dedup keeping first occurrence and insertion order
pub fn dedup_queries(queries: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .into_iter()
        .filter(|q| seen.insert(q.trim().to_lowercase()))
        .collect()
}

/// Generates alternative phrasings of a user query to widen recall
pub struct QueryReformulator {
    llm: Arc<dyn LanguageModel>,
    num_variations: usize,
}

impl QueryReformulator {
    pub fn new(llm: Arc<dyn LanguageModel>, num_variations: usize) -> Self {
        info!(
            "QueryReformulator initialized with {} variations ({})",
            num_variations,
            llm.model_name()
        );
        Self {
            llm,
            num_variations,
        }
    }

    pub fn num_variations(&self) -> usize {
        self.num_variations
    }

    /// Ask the model for paraphrases of `query`, capped at the configured count
    pub fn generate_variations(&self, query: &str) -> Result<Vec<String>, LlmError> {
        let messages = [
            ChatMessage::system(REFORMULATION_SYSTEM_PROMPT),
            ChatMessage::user(reformulation_prompt(query, self.num_variations)),
        ];

        let response = self.llm.chat(&messages)?;
        let mut variations = parse_generated_lines(&response);
        variations.truncate(self.num_variations);

        debug!("LLM generated {} reformulations", variations.len());
        Ok(variations)
    }

    /// Combine the original query with generated variations, deduplicated
    pub fn merge_variants(
        &self,
        query: &str,
        include_original: bool,
        generated: Vec<String>,
    ) -> Vec<String> {
        let original = include_original.then(|| query.to_string());
        let queries = dedup_queries(original.into_iter().chain(generated));

        for (i, q) in queries.iter().enumerate() {
            debug!("  {}. {}", i + 1, q);
        }
        queries
    }

    /// Produce query variants. Model failures degrade to no generated variants.
    pub fn reformulate(&self, query: &str, include_original: bool) -> Vec<String> {
        let generated = self.generate_variations(query).unwrap_or_else(|e| {
            warn!("Query reformulation failed, using original only: {}", e);
            Vec::new()
        });
        self.merge_variants(query, include_original, generated)
    }

    /// Split a complex question into simpler sub-questions.
    ///
    /// Never returns an empty list: falls back to `[query]`.
    pub fn decompose_query(&self, query: &str) -> Vec<String> {
        let messages = [
            ChatMessage::system(DECOMPOSITION_SYSTEM_PROMPT),
            ChatMessage::user(decomposition_prompt(query)),
        ];

        match self.llm.chat(&messages) {
            Ok(response) => {
                let sub_queries = parse_generated_lines(&response);
                if sub_queries.is_empty() {
                    warn!("Decomposition produced no usable sub-question");
                    return vec![query.to_string()];
                }
                info!("Decomposed into {} sub-questions", sub_queries.len());
                sub_queries
            }
            Err(e) => {
                warn!("Query decomposition failed: {}", e);
                vec![query.to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, String>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("connection refused".to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl LanguageModel for ScriptedModel {
        fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.reply.clone().map_err(LlmError::Http)
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_parse_strips_markers_and_noise() {
        let reply = "1. Quelles techniques de frappe sont autorisées ?\n\
                     - Quels coups sont permis en combat ?\n\
                     • court\n\
                     \n\
                     2) Liste des attaques légales en Kudo";
        let lines = parse_generated_lines(reply);
        assert_eq!(
            lines,
            vec![
                "Quelles techniques de frappe sont autorisées ?",
                "Quels coups sont permis en combat ?",
                "Liste des attaques légales en Kudo",
            ]
        );
    }

    #[test]
    fn test_reformulate_includes_original_and_caps() {
        let model = ScriptedModel::replying(
            "Comment l'arbitre attribue-t-il les points ?\n\
             Quel est le barème de marquage des points ?\n\
             Quels critères déterminent un point valide ?",
        );
        let reformulator = QueryReformulator::new(model.clone(), 2);

        let variants = reformulator.reformulate("Comment sont attribués les points ?", true);
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0], "Comment sont attribués les points ?");
        assert_eq!(variants[1], "Comment l'arbitre attribue-t-il les points ?");

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 2);
    }

    #[test]
    fn test_reformulate_dedups_case_insensitively() {
        let model = ScriptedModel::replying("QUELLES SONT LES FAUTES GRAVES ?\nQuelles sont les fautes graves ?  ");
        let reformulator = QueryReformulator::new(model, 2);

        let variants = reformulator.reformulate("Quelles sont les fautes graves ?", true);
        assert_eq!(variants, vec!["Quelles sont les fautes graves ?"]);
    }

    #[test]
    fn test_reformulate_failure_falls_back() {
        let reformulator = QueryReformulator::new(ScriptedModel::failing(), 2);

        assert_eq!(
            reformulator.reformulate("Que faire en cas de KO ?", true),
            vec!["Que faire en cas de KO ?"]
        );
        assert!(reformulator.reformulate("Que faire en cas de KO ?", false).is_empty());
        assert!(reformulator.generate_variations("Que faire en cas de KO ?").is_err());
    }

    #[test]
    fn test_decompose() {
        let model = ScriptedModel::replying(
            "1. Quel équipement est obligatoire ?\n2. Quelles protections sont interdites ?",
        );
        let reformulator = QueryReformulator::new(model, 2);
        let parts = reformulator.decompose_query("Équipement obligatoire et interdit ?");
        assert_eq!(
            parts,
            vec![
                "Quel équipement est obligatoire ?",
                "Quelles protections sont interdites ?"
            ]
        );
    }

    #[test]
    fn test_decompose_never_empty() {
        let query = "Équipement obligatoire pour les combattants";

        let failing = QueryReformulator::new(ScriptedModel::failing(), 2);
        assert_eq!(failing.decompose_query(query), vec![query]);

        let useless = QueryReformulator::new(ScriptedModel::replying("ok\n\n-"), 2);
        assert_eq!(useless.decompose_query(query), vec![query]);
    }
}
