use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::OnceLock;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::models::{Question, QuestionType, SubmissionAnswer, WithdrawalDestination, WithdrawalRail};

/// Minimum withdrawal amount in TZS-equivalent units.
pub const MIN_WITHDRAWAL: Decimal = dec!(10);

/// Flat withdrawal fee rate, shown to the user before confirmation. The
/// persisted request always records the pre-fee amount.
pub const FEE_RATE: Decimal = dec!(0.02);

/// Minimum amount a gateway collection can be initiated for.
pub const MIN_PAYMENT: Decimal = dec!(1);

/// Fixed catalogue page size.
pub const CATALOGUE_PAGE_SIZE: i64 = 10;

const AUTO_APPROVAL_MIN_SECS: i64 = 5 * 60;
const AUTO_APPROVAL_MAX_SECS: i64 = 20 * 60;

/// Deadline after which a completed submission is approved without manual
/// review. Randomized between 5 and 20 minutes so reviews do not all fall
/// due at once; the RNG and clock are injected so the bound is testable.
pub fn schedule_auto_approval<R: Rng>(now: DateTime<Utc>, rng: &mut R) -> DateTime<Utc> {
    let delay_secs = rng.gen_range(AUTO_APPROVAL_MIN_SECS..=AUTO_APPROVAL_MAX_SECS);
    now + Duration::seconds(delay_secs)
}

/// Fee and net payout for a withdrawal request, display-only.
pub fn withdrawal_fee(amount: Decimal) -> (Decimal, Decimal) {
    let fee = (amount * FEE_RATE).round_dp(2);
    (fee, amount - fee)
}

pub fn success_rate(completed_tasks: i32, applied_tasks: i32) -> f64 {
    if applied_tasks <= 0 {
        return 0.0;
    }
    f64::from(completed_tasks) / f64::from(applied_tasks)
}

static TZ_PHONE: OnceLock<Regex> = OnceLock::new();

/// Tanzanian mobile number: optional +255/255 or leading 0, then a 6x/7x
/// prefix and eight more digits.
pub fn is_valid_tz_phone(phone: &str) -> bool {
    let re = TZ_PHONE.get_or_init(|| Regex::new(r"^(?:\+?255|0)[67]\d{8}$").unwrap());
    re.is_match(phone.trim())
}

/// Per-rail destination validation. Returns a human-readable reason on
/// failure so the handler can surface it directly.
pub fn validate_destination(
    rail: WithdrawalRail,
    destination: &WithdrawalDestination,
) -> Result<(), String> {
    match rail {
        WithdrawalRail::MobileMoney => {
            let phone = destination.phone.as_deref().unwrap_or("");
            if !is_valid_tz_phone(phone) {
                return Err("Mobile money withdrawals require a valid Tanzanian mobile number".to_string());
            }
        }
        WithdrawalRail::Paypal => {
            let email = destination.email.as_deref().unwrap_or("");
            if !email.validate_email() {
                return Err("PayPal withdrawals require a valid email address".to_string());
            }
        }
        WithdrawalRail::Bank => {
            let missing = [
                ("bank name", &destination.bank_name),
                ("account holder name", &destination.account_name),
                ("account number", &destination.account_number),
            ]
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(label, _)| *label)
            .collect::<Vec<_>>();
            if !missing.is_empty() {
                return Err(format!(
                    "Bank withdrawals require: {}",
                    missing.join(", ")
                ));
            }
        }
    }
    Ok(())
}

/// Ids of required questions with no usable answer in the submission.
/// Text and choice answers must be non-empty; file answers must carry an
/// uploaded-file record.
pub fn missing_required_answers(
    questions: &[Question],
    answers: &HashMap<Uuid, SubmissionAnswer>,
) -> Vec<Uuid> {
    questions
        .iter()
        .filter(|q| q.required)
        .filter(|q| !answer_satisfies(q, answers.get(&q.id)))
        .map(|q| q.id)
        .collect()
}

fn answer_satisfies(question: &Question, answer: Option<&SubmissionAnswer>) -> bool {
    match (question.question_type, answer) {
        (QuestionType::File, Some(SubmissionAnswer::File { file_name, .. })) => {
            !file_name.trim().is_empty()
        }
        (QuestionType::File, _) => false,
        (_, Some(SubmissionAnswer::Text { answer })) => !answer.trim().is_empty(),
        (_, Some(SubmissionAnswer::SingleChoice { answer })) => !answer.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn question(id: Uuid, question_type: QuestionType, required: bool) -> Question {
        Question {
            id,
            task_id: Uuid::new_v4(),
            position: 0,
            question_type,
            prompt: "prompt".to_string(),
            choices: None,
            required,
            accepted_formats: None,
        }
    }

    #[test]
    fn auto_approval_deadline_stays_within_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let deadline = schedule_auto_approval(now, &mut rng);
            let delay = deadline - now;
            assert!(delay >= Duration::minutes(5), "delay {} too short", delay);
            assert!(delay <= Duration::minutes(20), "delay {} too long", delay);
        }
    }

    #[test]
    fn fee_is_two_percent_of_requested() {
        let (fee, payout) = withdrawal_fee(dec!(100));
        assert_eq!(fee, dec!(2));
        assert_eq!(payout, dec!(98));

        let (fee, payout) = withdrawal_fee(dec!(10));
        assert_eq!(fee, dec!(0.20));
        assert_eq!(payout, dec!(9.80));
    }

    #[test]
    fn tz_phone_accepts_local_and_international_forms() {
        assert!(is_valid_tz_phone("0712345678"));
        assert!(is_valid_tz_phone("0658765432"));
        assert!(is_valid_tz_phone("255712345678"));
        assert!(is_valid_tz_phone("+255712345678"));
    }

    #[test]
    fn tz_phone_rejects_malformed_numbers() {
        assert!(!is_valid_tz_phone("12345"));
        assert!(!is_valid_tz_phone("0812345678")); // not a mobile prefix
        assert!(!is_valid_tz_phone("071234567")); // too short
        assert!(!is_valid_tz_phone("07123456789")); // too long
        assert!(!is_valid_tz_phone(""));
        assert!(!is_valid_tz_phone("+254712345678")); // wrong country
    }

    #[test]
    fn mobile_money_destination_needs_valid_phone() {
        let dest = WithdrawalDestination {
            phone: Some("0712345678".to_string()),
            ..Default::default()
        };
        assert!(validate_destination(WithdrawalRail::MobileMoney, &dest).is_ok());

        let bad = WithdrawalDestination {
            phone: Some("12345".to_string()),
            ..Default::default()
        };
        assert!(validate_destination(WithdrawalRail::MobileMoney, &bad).is_err());
        assert!(validate_destination(WithdrawalRail::MobileMoney, &WithdrawalDestination::default()).is_err());
    }

    #[test]
    fn paypal_destination_needs_valid_email() {
        let dest = WithdrawalDestination {
            email: Some("worker@example.com".to_string()),
            ..Default::default()
        };
        assert!(validate_destination(WithdrawalRail::Paypal, &dest).is_ok());

        let bad = WithdrawalDestination {
            email: Some("not-an-email".to_string()),
            ..Default::default()
        };
        assert!(validate_destination(WithdrawalRail::Paypal, &bad).is_err());
    }

    #[test]
    fn bank_destination_names_every_missing_field() {
        let dest = WithdrawalDestination {
            bank_name: Some("CRDB".to_string()),
            account_name: Some("   ".to_string()),
            ..Default::default()
        };
        let err = validate_destination(WithdrawalRail::Bank, &dest).unwrap_err();
        assert!(err.contains("account holder name"));
        assert!(err.contains("account number"));
        assert!(!err.contains("bank name,"));
    }

    #[test]
    fn missing_required_answers_identifies_the_gap() {
        let q1 = Uuid::new_v4();
        let q2 = Uuid::new_v4();
        let q3 = Uuid::new_v4();
        let questions = vec![
            question(q1, QuestionType::Text, true),
            question(q2, QuestionType::SingleChoice, true),
            question(q3, QuestionType::Text, false),
        ];

        let mut answers = HashMap::new();
        answers.insert(
            q1,
            SubmissionAnswer::Text {
                answer: "an answer".to_string(),
            },
        );

        let missing = missing_required_answers(&questions, &answers);
        assert_eq!(missing, vec![q2]);
    }

    #[test]
    fn blank_text_answer_does_not_satisfy_a_required_question() {
        let q1 = Uuid::new_v4();
        let questions = vec![question(q1, QuestionType::Text, true)];
        let mut answers = HashMap::new();
        answers.insert(
            q1,
            SubmissionAnswer::Text {
                answer: "   ".to_string(),
            },
        );
        assert_eq!(missing_required_answers(&questions, &answers), vec![q1]);
    }

    #[test]
    fn file_question_requires_a_file_record() {
        let q1 = Uuid::new_v4();
        let questions = vec![question(q1, QuestionType::File, true)];

        let mut answers = HashMap::new();
        answers.insert(
            q1,
            SubmissionAnswer::Text {
                answer: "screenshot.png".to_string(),
            },
        );
        // A text answer does not satisfy a file question.
        assert_eq!(missing_required_answers(&questions, &answers), vec![q1]);

        answers.insert(
            q1,
            SubmissionAnswer::File {
                file_name: "screenshot.png".to_string(),
                file_type: "image/png".to_string(),
                file_size: 1024,
            },
        );
        assert!(missing_required_answers(&questions, &answers).is_empty());
    }

    #[test]
    fn success_rate_handles_zero_applied() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(3, 4), 0.75);
    }
}
