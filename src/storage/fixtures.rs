//! Development fixture case.
//!
//! Four documents from four institutions in which a neighbour's hedged
//! remark to the police is restated as fact by each later author and ends
//! in a removal order. Used by the `seed_fixtures` storage option and tests.

use chrono::NaiveDate;

use crate::document::Document;

pub const CASE_ID: &str = "PE23C50095";

pub const POLICE_REPORT: &str = "mock-police";
pub const SOCIAL_WORK_ASSESSMENT: &str = "mock-sw";
pub const EXPERT_REPORT: &str = "mock-expert";
pub const JUDGMENT: &str = "mock-court";

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

fn fixture(
    id: &str,
    title: &str,
    kind: &str,
    institution: &str,
    dated: Option<NaiveDate>,
    text: &str,
) -> Document {
    let mut doc = Document::new(id, CASE_ID, text)
        .with_title(title)
        .with_kind(kind)
        .with_institution(institution);
    doc.date = dated;
    doc
}

/// The fixture documents in chronological order.
pub fn documents() -> Vec<Document> {
    vec![
        fixture(
            POLICE_REPORT,
            "Police Incident Report",
            "police report",
            "Police",
            date(2023, 1, 10),
            "Officers attended the family home following a call from a neighbour.\n\n\
             A neighbour told officers that the father may have been drinking heavily on the night of the incident. \
             No injuries were observed on either child. \
             The mother presented as evasive and minimised the concerns raised by professionals.\n\n\
             No further police action is required at this time.",
        ),
        fixture(
            SOCIAL_WORK_ASSESSMENT,
            "Social Work Assessment",
            "assessment",
            "Social Services",
            date(2023, 2, 20),
            "This assessment follows the police referral.\n\n\
             The father has been drinking heavily and this presents a significant risk to the children. \
             The mother presented as evasive and minimised the concerns raised by professionals. \
             Home conditions were adequate during the visit.\n\n\
             The case will proceed to a child protection conference.",
        ),
        fixture(
            EXPERT_REPORT,
            "Psychological Assessment",
            "expert report",
            "Independent Expert",
            date(2023, 4, 5),
            "I have been instructed to assess the parents.\n\n\
             In my professional opinion the father has been drinking heavily and the risk to the children is serious and ongoing. \
             I did not interview the neighbour.",
        ),
        fixture(
            JUDGMENT,
            "Judgment",
            "judgment",
            "Family Court",
            date(2023, 6, 15),
            "The court has read the Social Work Assessment and the Psychological Assessment.\n\n\
             The father has been drinking heavily and the children cannot safely remain in his care. \
             The children are to be removed and placed in foster care under an interim care order.",
        ),
    ]
}
