fn main() {
    println!("Relay Examples");
    println!("==============");
    println!();
    println!("Run examples with: cargo run --bin <example_name>");
    println!("Available examples:");
    println!("  - signal_example: Named and typed signals, hooks, weak receivers");
}
