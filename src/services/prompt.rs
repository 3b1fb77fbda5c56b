/// Build the instruction text for a nutrition estimate.
///
/// Deterministic: the same inputs always produce the same prompt.
pub fn build_prompt(description: Option<&str>, has_image: bool) -> String {
    let mut prompt = String::from(
        "YOU ARE A NUTRITION ANALYSIS EXPERT. Estimate the nutritional content of the meal below.\n\n",
    );

    match (description, has_image) {
        (Some(description), true) => {
            prompt.push_str("INPUT:\n");
            prompt.push_str("- A photo of the meal is attached.\n");
            prompt.push_str(&format!("- The user describes it as: \"{}\"\n\n", description));
            prompt.push_str(
                "RECONCILE THE EVIDENCE:\n\
                 - Use the photo to judge portion size, cooking method and garnish.\n\
                 - Use the description for ingredients that are not visible (oil, sauces, fillings).\n\
                 - Where photo and description disagree, explain which you trusted and why.\n\
                 - Produce ONE consistent estimate covering both sources.\n\n",
            );
        }
        (Some(description), false) => {
            prompt.push_str("INPUT:\n");
            prompt.push_str(&format!("- The user describes the meal as: \"{}\"\n\n", description));
            prompt.push_str(
                "Assume a typical single-person portion unless the description states otherwise.\n\n",
            );
        }
        (None, true) => {
            prompt.push_str("INPUT:\n- A photo of the meal is attached. There is no text description.\n\n");
            prompt.push_str(
                "IDENTIFY THE MEAL:\n\
                 - Name the main dish, sides and drinks you can see.\n\
                 - Judge portion size and cooking method visually.\n\
                 - Write a short description of the meal (one sentence) in the \"description\" field.\n\n",
            );
        }
        (None, false) => {
            prompt.push_str("INPUT:\n- No description or photo was provided.\n\n");
        }
    }

    prompt.push_str(
        "CALCULATION RULES:\n\
         - Break the meal into components and estimate each component separately.\n\
         - For every nutrient, the explanation must show the per-component values and their sum.\n\
         - Each number in \"macros\" MUST equal the sum written in the matching \"explanation\" field.\n\
         - calories in kcal, protein/carbs/fat in grams, water in ml. All values are non-negative.\n\n",
    );

    prompt.push_str(
        "RESPONSE FORMAT (USE EXACTLY THIS, JSON ONLY, NO OTHER TEXT):\n\
         {\n\
         \x20 \"macros\": {\"calories\": <number>, \"protein\": <number>, \"carbs\": <number>, \"fat\": <number>, \"water\": <number>},\n\
         \x20 \"explanation\": {\"calories\": \"<derivation>\", \"protein\": \"<derivation>\", \"carbs\": \"<derivation>\", \"fat\": \"<derivation>\", \"water\": \"<derivation>\"}",
    );

    if description.is_none() && has_image {
        prompt.push_str(",\n  \"description\": \"<short description of the meal>\"");
    }

    prompt.push_str("\n}\n");
    prompt
}
