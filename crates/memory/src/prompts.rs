//! Built-in prompts for the fact pipeline.

use serde_json::Value;

/// System prompt for the fact-extraction call. `{current_date}` is
/// substituted at memory construction, `{current_request}` at flush time.
pub const FACT_EXTRACTION_PROMPT: &str = r#"You are a Personal Information Organizer, specialized in accurately storing facts, user memories, and preferences. Your primary role is to extract relevant pieces of information from conversations and organize them into distinct, manageable facts. This allows for easy retrieval and personalization in future interactions. Below are the types of information you need to focus on and the detailed instructions on how to handle the input data.

Types of Information to Remember:

1. Store Personal Preferences: Keep track of likes, dislikes, and specific preferences in various categories such as food, products, activities, and entertainment.
2. Maintain Important Personal Details: Remember significant personal information like names, relationships, and important dates.
3. Track Plans and Intentions: Note upcoming events, trips, goals, and any plans the user has shared or assistant has generated.
4. Remember Activity and Service Preferences: Recall preferences for dining, travel, hobbies, and other services.
5. Monitor Health and Wellness Preferences: Keep a record of dietary restrictions, fitness routines, and other wellness-related information.
6. Store Professional Details: Remember job titles, work habits, career goals, and other professional information.
7. Miscellaneous Information Management: Keep track of favorite books, movies, brands, and other miscellaneous details that the user shares.

Remember the following:
- Today's date is {current_date}.
- Refer to current request to determine what to extract: {current_request}
- If you do not find anything relevant in the below input, you can return an empty list corresponding to the "facts" key.
- Create the facts based on the below input only. Do not pick anything from the system messages.
- Only extracted facts from the assistant when they are relevant to the user's ongoing task.
- Call the `fact_extract` tool to return the extracted facts.
- Only extracted facts will be used for further processing, other information will be discarded.
- Replace all personal pronouns with specific characters (user, assistant, .etc) to avoid any confusion.

Following is a message parsed from previous interactions. You have to extract the relevant facts and preferences about the user and some accomplished tasks about the assistant.
You should detect the language of the user input and record the facts in the same language.

Below is the data to extract in XML tags <input> and </input>:
"#;

/// Base prompt for the memory-update call.
pub const UPDATE_MEMORY_PROMPT: &str = r#"You are a smart memory manager which controls the memory of a system.
You can perform four operations: (1) add into the memory, (2) update the memory, (3) delete from the memory, and (4) no change.

Based on the above four operations, the memory will change.

Compare newly retrieved facts with the existing memory. For each new fact, decide whether to:
- ADD: Add it to the memory as a new element
- UPDATE: Update an existing memory element
- DELETE: Delete an existing memory element
- NONE: Make no change (if the fact is already present or irrelevant)

There are specific guidelines to select which operation to perform:

1. **Add**: If the retrieved facts contain new information not present in the memory, then you have to add it by generating a new ID in the id field.
2. **Update**: If the retrieved facts contain information that is already present in the memory but the information is totally different, then you have to update it.
If the retrieved fact contains information that conveys the same thing as the elements present in the memory, then you have to keep the fact which has the most information.
Please keep in mind while updating you have to keep the same ID.
Please note to return the IDs in the output from the input IDs only and do not generate any new ID.
3. **Delete**: If the retrieved facts contain information that contradicts the information present in the memory, then you have to delete it. Or if the direction is to delete the memory, then you have to delete it.
Please note to return the IDs in the output from the input IDs only and do not generate any new ID.
4. **No Change**: If the retrieved facts contain information that is already present in the memory, then you do not need to make any changes.
"#;

/// Assemble the full user prompt for the memory-update call: base prompt,
/// current memory, new facts, and the expected response schema.
pub fn build_update_memory_prompt(
    old_memories: &Value,
    new_facts: &Value,
    base_prompt: &str,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(base_prompt);
    prompt.push_str("\n\n");
    prompt.push_str("Below is the current content of my memory which I have collected till now. You have to update it in the following format only:\n\n");
    prompt.push_str(&serde_json::to_string_pretty(old_memories).unwrap_or_default());
    prompt.push_str("\n\n");
    prompt.push_str("The new retrieved facts are mentioned below. You have to analyze the new retrieved facts and determine whether these facts should be added, updated, or deleted in the memory.\n\n");
    prompt.push_str(&serde_json::to_string_pretty(new_facts).unwrap_or_default());
    prompt.push_str("\n\n");
    prompt.push_str("Call the `memory` tool with one event per fact. Each event carries:\n");
    prompt.push_str("- id: the integer ID of the memory (use existing IDs for updates/deletes)\n");
    prompt.push_str("- text: the content of the memory\n");
    prompt.push_str("- type: one of \"ADD\", \"UPDATE\", \"DELETE\", \"NONE\"\n");
    prompt.push_str("- old_memory: the previous content, required only for UPDATE\n\n");
    prompt.push_str("Follow the instruction mentioned below:\n");
    prompt.push_str("- Do not return anything from the custom few shot prompts provided above.\n");
    prompt.push_str("- If the current memory is empty, then you have to add the new retrieved facts to the memory.\n");
    prompt.push_str("- If there is an addition, generate a new key and add the new memory corresponding to it.\n");
    prompt.push_str("- If there is a deletion, the memory key-value pair should be removed from the memory.\n");
    prompt.push_str("- If there is an update, the ID key should remain the same and only the value needs to be updated.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_prompt_embeds_memories_and_facts() {
        let old = json!([{"id": 0, "text": "User likes tea"}]);
        let facts = json!(["User likes coffee"]);
        let prompt = build_update_memory_prompt(&old, &facts, UPDATE_MEMORY_PROMPT);
        assert!(prompt.contains("User likes tea"));
        assert!(prompt.contains("User likes coffee"));
        assert!(prompt.contains("ADD"));
        assert!(prompt.contains("`memory` tool"));
    }
}
