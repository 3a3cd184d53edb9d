/// Separator between context units in the assembled prompt. Stable so
/// answers cite recognizable blocks.
pub const CONTEXT_DELIMITER: &str = "\n\n";

/// Renders the fixed grounded-prompt template: context units in retrieval
/// order, then the question, with the grounding instruction up front.
pub fn grounded_prompt(context_units: &[String], question: &str) -> String {
    let context = context_units.join(CONTEXT_DELIMITER);

    format!(
        "You are a helpful AI assistant.\n\
         Use the provided context to answer the user's question.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         Answer clearly and rely on the documents provided before using external knowledge.\n\
         If the context doesn't contain relevant information, say so."
    )
}
