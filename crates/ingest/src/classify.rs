use db::models::email::Status;

const REJECTION_PHRASES: &[&str] = &[
    "regret",
    "unfortunately",
    "not selected",
    "not moving forward",
    "decided to pursue",
    "other candidates",
    "not a fit",
    "decline",
    "unable to offer",
    "not proceed",
    "thank you for your interest",
    "better match",
    "competitive",
    "keep your resume on file",
    "different direction",
    "position has been filled",
];

const SELECTION_PHRASES: &[&str] = &[
    "congratulations",
    "pleased to",
    "happy to inform",
    "selected",
    "shortlisted",
    "next round",
    "interview",
    "offer",
    "move forward",
    "excited to",
    "impressed",
    "would like to schedule",
    "extend an offer",
    "finalist",
    "successful",
    "advancing",
    "invitation",
];

const PENDING_PHRASES: &[&str] = &[
    "under review",
    "reviewing",
    "received your application",
    "application submitted",
    "will be in touch",
    "currently reviewing",
    "being reviewed",
    "considering",
    "processing",
    "evaluating",
];

/// Scores subject and body against the three phrase lists and returns the
/// status with the most distinct matches.
///
/// Matching is case-insensitive and by substring, so "interviews" counts
/// for "interview". No matches at all, or a tie between the leading
/// categories, resolves to [`Status::Pending`] rather than guessing.
pub fn classify(subject: &str, body: &str) -> Status {
    let text = format!("{} {}", subject, body).to_lowercase();
    let scores = [
        (Status::Rejection, score(&text, REJECTION_PHRASES)),
        (Status::Selection, score(&text, SELECTION_PHRASES)),
        (Status::Pending, score(&text, PENDING_PHRASES)),
    ];

    let best = scores.iter().map(|(_, n)| *n).max().unwrap_or(0);
    if best == 0 {
        return Status::Pending;
    }

    let mut leaders = scores.iter().filter(|(_, n)| *n == best);
    match (leaders.next(), leaders.next()) {
        (Some((status, _)), None) => *status,
        _ => Status::Pending,
    }
}

fn score(text: &str, phrases: &[&str]) -> usize {
    phrases.iter().filter(|phrase| text.contains(**phrase)).count()
}
