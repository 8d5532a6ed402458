use extract::Intent;

pub fn build_answer_prompt(
    question: &str,
    user_name: Option<&str>,
    source_label: &str,
    context: &[String],
) -> String {
    let data = context
        .iter()
        .map(|line| format!("- {}", line))
        .collect::<Vec<_>>()
        .join("\n");
    let user = user_name.unwrap_or("the investor");

    format!(
        r#"You are a mutual fund assistant answering {} in India.

RULES:
1. Use ONLY the data below for any number (NAV, returns, expense ratio, AUM)
2. Copy figures exactly as written; never round, estimate or invent them
3. If the data does not answer the question, say so plainly
4. Do not promise returns or recommend buying or selling
5. Answer in 2-4 sentences, no markdown

DATA (source: {}):
{}

QUESTION:
{}

ANSWER:"#,
        user, source_label, data, question
    )
}

/// Used when no data source is involved: greetings and smalltalk.
pub fn build_conversation_prompt(message: &str, user_name: Option<&str>) -> String {
    let greeting = user_name
        .map(|name| format!("The user's name is {}. ", name))
        .unwrap_or_default();

    format!(
        r#"You are a friendly mutual fund assistant. {}Reply briefly (1-2 sentences) to the message below and mention that you can help with fund NAVs, performance, comparisons and KYC or redemption questions. Do not state any fund figures.

MESSAGE:
{}

REPLY:"#,
        greeting, message
    )
}

pub fn build_guidance_prompt(question: &str, intent: Intent) -> String {
    let topic = match intent {
        Intent::KycQuery => "KYC requirements and documentation for mutual fund investors",
        Intent::RedemptionQuery => "the mutual fund redemption process",
        Intent::AccountIssue => "investor account and login issues",
        _ => "general mutual fund concepts",
    };

    format!(
        r#"Explain {} in India for a retail investor.

RULES:
- Describe processes and concepts only
- Do not quote NAVs, returns or any other fund figures
- Suggest checking with the AMC, registrar or SEBI/AMFI websites where relevant
- At most 5 sentences

QUESTION:
{}

ANSWER:"#,
        topic, question
    )
}
