use cuddle::{parse, report, DocumentBuffers};

fn main() {
    let kdl_data = r#"
        user name="John Doe" {
            email "john.doe@example.com"
            /- phone "555-0100"
        }
    "#;

    let mut buffers = DocumentBuffers::default();
    match parse(kdl_data, &mut buffers) {
        Ok(document) => {
            let json_output = document.to_json().unwrap();
            println!("Successfully parsed KDL to JSON:\n{json_output}");
            println!("Canonical form:\n{document}");
        }
        Err(e) => {
            eprintln!("Failed to parse KDL: {:?}", report(e, "example.kdl", kdl_data));
        }
    }
}
