use fastnode_bake::version::version_string;
use fastnode_bake::VERSION;
use miette::Result;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "name": "howth", "version": VERSION }));
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
