use crate::tokenize::Token;

// ---------------------------------------------------------------------------
// BayesClassifier
// ---------------------------------------------------------------------------

/// Classification verdict with the spam probability and the number of
/// tokens that carried evidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub spam_prob: f64,
    pub evidence_tokens: usize,
}

impl Verdict {
    pub fn is_spam(&self) -> bool {
        self.spam_prob > 0.5
    }

    /// Confidence in `[0, 1]`: distance from the undecided midpoint.
    pub fn confidence(&self) -> f64 {
        (self.spam_prob - 0.5).abs() * 2.0
    }
}

/// Naive Bayes over per-statfile token counts. Token counts for the spam
/// and ham classes are read from the slots the backend pre-fetch filled.
pub struct BayesClassifier;

impl BayesClassifier {
    /// `spam_slots` and `ham_slots` index `Token::counts` for the two
    /// classes; `spam_learns`/`ham_learns` are totals across statfiles.
    pub fn classify(
        tokens: &[Token],
        spam_slots: &[usize],
        ham_slots: &[usize],
        spam_learns: u64,
        ham_learns: u64,
    ) -> Verdict {
        // Uninformed prior when either class has never been trained.
        if spam_learns == 0 || ham_learns == 0 {
            return Verdict {
                spam_prob: 0.5,
                evidence_tokens: 0,
            };
        }

        let spam_total = spam_learns as f64;
        let ham_total = ham_learns as f64;
        let mut log_ratio = 0.0f64;
        let mut evidence = 0usize;

        for token in tokens {
            let spam_count: u64 = spam_slots.iter().map(|&s| token.counts[s]).sum();
            let ham_count: u64 = ham_slots.iter().map(|&s| token.counts[s]).sum();
            if spam_count == 0 && ham_count == 0 {
                continue;
            }
            evidence += 1;
            // Laplace-smoothed per-class rates.
            let p_spam = (spam_count as f64 + 1.0) / (spam_total + 2.0);
            let p_ham = (ham_count as f64 + 1.0) / (ham_total + 2.0);
            log_ratio += (p_spam / p_ham).ln();
        }

        if evidence == 0 {
            return Verdict {
                spam_prob: 0.5,
                evidence_tokens: 0,
            };
        }

        // Clamp to keep exp() well-behaved on long messages.
        let clamped = log_ratio.clamp(-30.0, 30.0);
        let spam_prob = 1.0 / (1.0 + (-clamped).exp());
        Verdict {
            spam_prob,
            evidence_tokens: evidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn token(spam: u64, ham: u64) -> Token {
        Token {
            hash: 0,
            counts: vec![spam, ham],
        }
    }

    #[test]
    fn untrained_classes_stay_undecided() {
        let tokens = vec![token(5, 0)];
        let v = BayesClassifier::classify(&tokens, &[0], &[1], 0, 10);
        assert_eq!(v.spam_prob, 0.5);
        assert_eq!(v.evidence_tokens, 0);
    }

    #[test]
    fn spammy_tokens_push_probability_up() {
        let tokens: Vec<Token> = (0..10).map(|_| token(8, 0)).collect();
        let v = BayesClassifier::classify(&tokens, &[0], &[1], 20, 20);
        assert!(v.is_spam(), "prob = {}", v.spam_prob);
        assert!(v.spam_prob > 0.9);
        assert_eq!(v.evidence_tokens, 10);
    }

    #[test]
    fn hammy_tokens_push_probability_down() {
        let tokens: Vec<Token> = (0..10).map(|_| token(0, 8)).collect();
        let v = BayesClassifier::classify(&tokens, &[0], &[1], 20, 20);
        assert!(!v.is_spam());
        assert!(v.spam_prob < 0.1);
    }

    #[test]
    fn unseen_tokens_carry_no_evidence() {
        let tokens: Vec<Token> = (0..10).map(|_| token(0, 0)).collect();
        let v = BayesClassifier::classify(&tokens, &[0], &[1], 20, 20);
        assert_eq!(v.spam_prob, 0.5);
        assert_eq!(v.evidence_tokens, 0);
    }

    #[test]
    fn balanced_evidence_is_undecided() {
        let tokens = vec![token(4, 4), token(2, 2)];
        let v = BayesClassifier::classify(&tokens, &[0], &[1], 10, 10);
        assert!((v.spam_prob - 0.5).abs() < 1e-9);
        assert_eq!(v.evidence_tokens, 2);
    }

    #[test]
    fn confidence_scales_with_distance() {
        let sure = Verdict { spam_prob: 0.99, evidence_tokens: 5 };
        let unsure = Verdict { spam_prob: 0.55, evidence_tokens: 5 };
        assert!(sure.confidence() > unsure.confidence());
        assert!(sure.confidence() <= 1.0);
    }
}
